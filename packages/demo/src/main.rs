//! Runs a few workers against a store and feeds them jobs.
//!
//! `DOCQUEUE_DB` selects a SurrealDB endpoint (`mem://`, `file://path`, ...);
//! without it an in-process store is used. `DOCQUEUE_INDEX` names the index.

use std::sync::Arc;
use std::time::Duration;

use docqueue::{Queue, Worker, WorkerConfig};
use docqueue_db::{DbConfig, DocumentStore, MemoryStore, SurrealStore};
use serde_json::json;

mod handlers;

const DEFAULT_INDEX: &str = "jobs";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let index = std::env::var("DOCQUEUE_INDEX").unwrap_or_else(|_| DEFAULT_INDEX.to_string());

    match std::env::var("DOCQUEUE_DB") {
        Ok(endpoint) => {
            let store = SurrealStore::connect(&DbConfig::endpoint(endpoint)).await?;
            store.ensure_index(&index).await?;
            run(Queue::new(Arc::new(store), index)).await
        }
        Err(_) => {
            tracing::info!("DOCQUEUE_DB not set, using the in-process store");
            run(Queue::new(Arc::new(MemoryStore::new()), index)).await
        }
    }
}

async fn run<S: DocumentStore>(queue: Queue<S>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting demo on index {}", queue.index());

    let mut events = queue.events();
    let config = WorkerConfig::default().with_interval(Duration::from_millis(250));

    let workers = vec![
        queue.worker("echo", handlers::echo, config.clone()).await?,
        queue.worker("echo", handlers::echo, config.clone()).await?,
        queue.worker("sleep", handlers::sleep, config.clone()).await?,
        Worker::builder(&queue)
            .job_type("fail")
            .handler(handlers::fail)
            .config(config)
            .max_attempts(3)
            .spawn()
            .await?,
    ];

    let mut pending = Vec::new();
    for n in 0..5 {
        pending.push(queue.add_job("echo", json!({"n": n})).await?);
    }
    pending.push(queue.add_job("sleep", json!({"millis": 1200})).await?);
    pending.push(queue.add_job("fail", json!({"fail": true})).await?);
    pending.push(queue.add_job("fail", json!({"fail": false})).await?);

    let mut remaining = pending.len();
    while remaining > 0 {
        match tokio::time::timeout(Duration::from_secs(30), events.recv()).await {
            Ok(Ok(event)) => {
                tracing::info!("{}", event.description());
                if event.is_terminal() {
                    remaining -= 1;
                }
            }
            Ok(Err(e)) => tracing::warn!("Event stream interrupted: {}", e),
            Err(_) => {
                tracing::warn!("Gave up waiting for {} jobs", remaining);
                break;
            }
        }
    }

    for job in &mut pending {
        job.refresh().await?;
        tracing::info!(
            job_id = %job.id(),
            job_type = job.job_type(),
            status = %job.status(),
            finished = job.status().is_terminal(),
            attempts = job.document().attempts,
            "Final state"
        );
    }

    for worker in workers {
        worker.stop().await?;
    }

    Ok(())
}
