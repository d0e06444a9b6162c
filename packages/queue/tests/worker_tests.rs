#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docqueue::{
    ClaimedJob, JobEvent, JobStatus, QueueError, ValidationError, Worker, WorkerConfig,
};
use docqueue_db::{DocumentStore, Version};
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, sleep_until};

use common::{FROZEN_AT, INDEX, is_completed, is_failed, next_event};

async fn echo(job: ClaimedJob) -> docqueue::HandlerResult {
    Ok(job.payload)
}

#[tokio::test(start_paused = true)]
async fn polls_once_per_interval_after_a_full_interval() {
    let (store, queue) = common::setup();
    let start = Instant::now();
    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();

    assert!(store.calls().is_empty());

    sleep_until(start + Duration::from_millis(1000)).await;
    assert_eq!(store.search_count(), 0);

    sleep_until(start + Duration::from_millis(2000)).await;
    assert_eq!(store.search_count(), 1);

    sleep_until(start + Duration::from_millis(3500)).await;
    assert_eq!(store.search_count(), 2);

    sleep_until(start + Duration::from_millis(5000)).await;
    assert_eq!(store.search_count(), 3);

    worker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn custom_interval_sets_the_cadence() {
    let (store, queue) = common::setup();
    let start = Instant::now();
    let worker = Worker::builder(&queue)
        .job_type("email")
        .handler(echo)
        .interval(Duration::from_millis(100))
        .spawn()
        .await
        .unwrap();

    sleep_until(start + Duration::from_millis(1050)).await;
    assert_eq!(store.search_count(), 10);
    worker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn requests_default_or_configured_batch_size() {
    let (store, queue) = common::setup();

    let default = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();
    sleep(Duration::from_millis(1600)).await;
    default.stop().await.unwrap();
    assert_eq!(store.searches(), vec![10]);

    let sized = queue
        .worker("email", echo, WorkerConfig::default().with_size(3))
        .await
        .unwrap();
    sleep(Duration::from_millis(1600)).await;
    sized.stop().await.unwrap();
    assert_eq!(store.searches(), vec![10, 3]);
}

#[tokio::test(start_paused = true)]
async fn claims_with_the_observed_version_and_frozen_clock() {
    let (store, queue, _clock) = common::setup_frozen();
    let mut events = queue.events();
    let mut job = queue.add_job("email", json!({"to": "a@b.c"})).await.unwrap();

    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();
    let completed = next_event(&mut events, is_completed).await;
    worker.stop().await.unwrap();

    let updates = store.updates();
    assert_eq!(updates.len(), 2);

    let (id, expected, claim) = &updates[0];
    assert_eq!(id, job.id().as_str());
    assert_eq!(*expected, job.version());
    assert_eq!(
        claim,
        &json!({
            "attempts": 1,
            "status": "processing",
            "process_expiration": "2016-04-02T01:02:13.456Z",
            "started": FROZEN_AT
        })
    );

    let (_, expected, finish) = &updates[1];
    assert_eq!(*expected, Version(2));
    assert_eq!(finish, &json!({"status": "completed", "completed": FROZEN_AT}));

    match completed {
        JobEvent::JobCompleted { job_id, output, worker_id, .. } => {
            assert_eq!(&job_id, job.id());
            assert_eq!(output, json!({"to": "a@b.c"}));
            assert!(!worker_id.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }

    job.refresh().await.unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.document().attempts, 1);
    assert_eq!(job.version(), Version(3));
    assert_eq!(
        job.document().completed.map(|at| docqueue_core::timestamp::format(&at)),
        Some(FROZEN_AT.to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn job_timeout_overrides_worker_default() {
    let (store, queue, _clock) = common::setup_frozen();
    let mut events = queue.events();
    let mut doc = docqueue::JobDocument::new(
        json!({}),
        common::at(FROZEN_AT),
        1,
    );
    doc.timeout = None;
    store
        .inner()
        .index(INDEX, "email", serde_json::to_value(&doc).unwrap())
        .await
        .unwrap();
    queue
        .add_job_with("email", json!({}), docqueue::JobOptions::default().with_timeout_ms(4567))
        .await
        .unwrap();

    let worker = queue
        .worker(
            "email",
            echo,
            WorkerConfig::default().with_timeout(Duration::from_millis(2000)),
        )
        .await
        .unwrap();
    next_event(&mut events, is_completed).await;
    next_event(&mut events, is_completed).await;
    worker.stop().await.unwrap();

    let expirations: Vec<_> = store
        .updates()
        .into_iter()
        .filter_map(|(_, _, patch)| patch.get("process_expiration").cloned())
        .collect();
    assert_eq!(
        expirations,
        vec![json!("2016-04-02T01:02:05.456Z"), json!("2016-04-02T01:02:08.023Z")]
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_worker_arguments_fail_before_arming() {
    let (store, queue) = common::setup();

    let missing_type = Worker::builder(&queue).handler(echo).spawn().await;
    assert!(matches!(
        missing_type,
        Err(QueueError::Validation(ValidationError::InvalidType))
    ));

    let blank_type = queue.worker(" ", echo, WorkerConfig::default()).await;
    assert!(matches!(
        blank_type,
        Err(QueueError::Validation(ValidationError::InvalidType))
    ));

    let missing_handler = Worker::builder(&queue).job_type("email").spawn().await;
    assert!(matches!(
        missing_handler,
        Err(QueueError::Validation(ValidationError::MissingHandler))
    ));

    for config in [
        WorkerConfig::default().with_size(0),
        WorkerConfig::default().with_interval(Duration::ZERO),
        WorkerConfig::default().with_timeout(Duration::ZERO),
    ] {
        let result = queue.worker("email", echo, config).await;
        assert!(matches!(
            result,
            Err(QueueError::Validation(ValidationError::InvalidConfig(_)))
        ));
    }

    sleep(Duration::from_secs(10)).await;
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn handler_errors_and_panics_mark_the_job_failed() {
    let (_store, queue) = common::setup();
    let mut events = queue.events();

    let mut erroring = queue.add_job("bad", json!({"n": 1})).await.unwrap();
    let worker = queue
        .worker(
            "bad",
            |_job: ClaimedJob| async move { Err::<serde_json::Value, _>("smtp refused".to_string()) },
            WorkerConfig::default(),
        )
        .await
        .unwrap();
    match next_event(&mut events, is_failed).await {
        JobEvent::JobFailed { error, attempts, .. } => {
            assert_eq!(error, "smtp refused");
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    worker.stop().await.unwrap();
    erroring.refresh().await.unwrap();
    assert_eq!(erroring.status(), JobStatus::Failed);
    assert!(erroring.document().completed.is_some());

    let mut panicking = queue.add_job("boom", json!({})).await.unwrap();
    let worker = queue
        .worker(
            "boom",
            |_job: ClaimedJob| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, String>(json!({}))
            },
            WorkerConfig::default(),
        )
        .await
        .unwrap();
    match next_event(&mut events, is_failed).await {
        JobEvent::JobFailed { error, .. } => assert_eq!(error, "handler panicked: boom"),
        other => panic!("unexpected {other:?}"),
    }

    // The loop survives the panic
    let next = queue.add_job("boom", json!({})).await.unwrap();
    match next_event(&mut events, is_failed).await {
        JobEvent::JobFailed { job_id, .. } => assert_eq!(&job_id, next.id()),
        other => panic!("unexpected {other:?}"),
    }
    worker.stop().await.unwrap();

    panicking.refresh().await.unwrap();
    assert_eq!(panicking.status(), JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn one_candidate_failing_does_not_abort_the_batch() {
    let (store, queue) = common::setup();
    let mut events = queue.events();

    // A document the worker cannot decode, created first so it sorts first
    store
        .inner()
        .index(
            INDEX,
            "email",
            json!({"created": "2000-01-01T00:00:00.000Z", "status": "pending"}),
        )
        .await
        .unwrap();
    let good = queue.add_job("email", json!({"ok": true})).await.unwrap();

    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();
    match next_event(&mut events, is_completed).await {
        JobEvent::JobCompleted { job_id, .. } => assert_eq!(&job_id, good.id()),
        other => panic!("unexpected {other:?}"),
    }

    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.completed, 1);
    worker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_searches_do_not_stop_the_loop() {
    let (store, queue) = common::setup();
    let mut events = queue.events();
    queue.add_job("email", json!({})).await.unwrap();
    store.fail_next_searches(2);

    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();

    let first = next_event(&mut events, |e| matches!(e, JobEvent::PollFailed { .. })).await;
    assert_eq!(first.worker_id(), Some(worker.id().to_string().as_str()));
    next_event(&mut events, |e| matches!(e, JobEvent::PollFailed { .. })).await;
    next_event(&mut events, is_completed).await;

    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(store.search_count(), 3);
    worker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_ends_polling() {
    let (store, queue) = common::setup();
    let mut events = queue.events();
    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();
    let worker_id = worker.id().to_string();

    sleep(Duration::from_millis(3100)).await;
    assert_eq!(store.search_count(), 2);

    worker.stop().await.unwrap();
    let stopped = next_event(&mut events, |e| matches!(e, JobEvent::WorkerStopped { .. })).await;
    assert_eq!(stopped.worker_id(), Some(worker_id.as_str()));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(store.search_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_drains_the_cycle_in_flight() {
    let (_store, queue) = common::setup();
    let mut job = queue.add_job("slow", json!({})).await.unwrap();
    let started = Arc::new(Notify::new());

    let signal = started.clone();
    let worker = queue
        .worker(
            "slow",
            move |_job: ClaimedJob| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>(json!({"slept": 5}))
                }
            },
            WorkerConfig::default(),
        )
        .await
        .unwrap();

    started.notified().await;
    worker.stop().await.unwrap();

    job.refresh().await.unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn dropped_worker_stops_polling() {
    let (store, queue) = common::setup();
    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();
    sleep(Duration::from_millis(1600)).await;
    drop(worker);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(store.search_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn competing_workers_run_a_job_once() {
    let (_store, queue) = common::setup();
    let mut events = queue.events();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..3 {
        let runs = runs.clone();
        let worker = queue
            .worker(
                "email",
                move |job: ClaimedJob| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, String>(job.payload) }
                },
                WorkerConfig::default(),
            )
            .await
            .unwrap();
        workers.push(worker);
    }

    let mut job = queue.add_job("email", json!({})).await.unwrap();
    next_event(&mut events, is_completed).await;
    sleep(Duration::from_secs(15)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    job.refresh().await.unwrap();
    assert_eq!(job.document().attempts, 1);
    for worker in workers {
        worker.stop().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn expired_claims_are_reclaimed_and_stale_results_discarded() {
    let (store, queue, clock) = common::setup_frozen();
    let mut events = queue.events();
    let mut job = queue
        .add_job_with("email", json!({}), docqueue::JobOptions::default().with_timeout_ms(1000))
        .await
        .unwrap();
    let start = Instant::now();

    // The first worker claims the job and then stalls
    let gate = Arc::new(Notify::new());
    let stalled_gate = gate.clone();
    let stalled = queue
        .worker(
            "email",
            move |_job: ClaimedJob| {
                let gate = stalled_gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, String>(json!("late"))
                }
            },
            WorkerConfig::default(),
        )
        .await
        .unwrap();
    match next_event(&mut events, |e| matches!(e, JobEvent::JobClaimed { .. })).await {
        JobEvent::JobClaimed { reclaimed, attempts, .. } => {
            assert!(!reclaimed);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected {other:?}"),
    }

    // The claim has not lapsed yet, so a second worker leaves it alone
    sleep_until(start + Duration::from_millis(1600)).await;
    let rescuer = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();
    sleep_until(start + Duration::from_millis(3200)).await;
    assert_eq!(rescuer.stats().await.unwrap().fetched, 0);

    // Past the expiration the rescuer takes over
    clock.advance(chrono::Duration::seconds(5));
    match next_event(&mut events, |e| matches!(e, JobEvent::JobClaimed { .. })).await {
        JobEvent::JobClaimed { reclaimed, attempts, worker_id, .. } => {
            assert!(reclaimed);
            assert_eq!(attempts, 2);
            assert_eq!(worker_id, rescuer.id().to_string());
        }
        other => panic!("unexpected {other:?}"),
    }
    next_event(&mut events, is_completed).await;

    // The stalled worker finishes late and loses
    gate.notify_one();
    let stats = stalled.stats().await.unwrap();
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.completed, 0);

    job.refresh().await.unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.document().attempts, 2);
    assert_eq!(
        job.document().started.map(|at| docqueue_core::timestamp::format(&at)),
        Some(FROZEN_AT.to_string())
    );

    let finalizes = store
        .updates()
        .into_iter()
        .filter(|(_, _, patch)| patch.get("completed").is_some())
        .count();
    assert_eq!(finalizes, 2);

    stalled.stop().await.unwrap();
    rescuer.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn attempt_ceiling_fails_instead_of_claiming() {
    let (store, queue) = common::setup();
    let mut events = queue.events();
    let mut job = queue.add_job("email", json!({})).await.unwrap();
    store
        .inner()
        .update(INDEX, "email", job.id().as_str(), job.version(), json!({"attempts": 2}))
        .await
        .unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let worker = Worker::builder(&queue)
        .job_type("email")
        .handler(move |job: ClaimedJob| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(job.payload) }
        })
        .max_attempts(2)
        .spawn()
        .await
        .unwrap();

    match next_event(&mut events, is_failed).await {
        JobEvent::JobFailed { error, attempts, .. } => {
            assert_eq!(error, docqueue::protocol::MAX_ATTEMPTS_REACHED);
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
    worker.stop().await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    job.refresh().await.unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(job.document().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn worker_listeners_receive_lifecycle_events() {
    let (_store, queue) = common::setup();
    let mut events = queue.events();
    let worker = queue.worker("email", echo, WorkerConfig::default()).await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let listener = worker.subscribe(move |event| {
        if event.is_terminal() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    queue.add_job("email", json!({})).await.unwrap();
    next_event(&mut events, is_completed).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(worker.unsubscribe(listener));
    queue.add_job("email", json!({})).await.unwrap();
    next_event(&mut events, is_completed).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert_eq!(worker.job_type(), "email");
    assert!(worker.is_running());
    worker.stop().await.unwrap();
}
