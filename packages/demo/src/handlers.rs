use std::time::Duration;

use docqueue::{ClaimedJob, HandlerResult};
use serde::Deserialize;
use serde_json::json;

/// Returns the payload unchanged.
pub async fn echo(job: ClaimedJob) -> HandlerResult {
    tracing::info!("Echo job {}: {:?}", job.id, job.payload);
    Ok(job.payload)
}

/// Fails when the payload asks it to.
pub async fn fail(job: ClaimedJob) -> HandlerResult {
    let should_fail = job
        .payload
        .get("fail")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if should_fail {
        Err(format!("Intentional failure on attempt {}", job.attempts))
    } else {
        Ok(json!({"ok": true}))
    }
}

#[derive(Debug, Deserialize)]
struct Sleep {
    #[serde(default = "default_millis")]
    millis: u64,
}

fn default_millis() -> u64 {
    500
}

/// Sleeps for `millis` from the payload.
pub async fn sleep(job: ClaimedJob) -> HandlerResult {
    let Sleep { millis } = job.payload_as()?;
    tracing::info!("Sleeping for {} ms", millis);
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(json!({"slept_ms": millis}))
}
