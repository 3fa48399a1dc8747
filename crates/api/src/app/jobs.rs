//! Job handlers run by the in-process sync worker.

use grainlify_infra::jobs::{HandlerRegistry, Job};
use tracing::info;

pub const PING_JOB: &str = "system.ping";

/// Handlers known to this binary.
///
/// `system.ping` only logs, so operators can check the worker end to end.
/// Jobs of any other kind fail and are dead-lettered once retries run out.
pub fn job_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();

    handlers.register(PING_JOB, |job: Job| async move {
        info!(job_id = %job.id, attempt = job.attempt, payload = %job.payload, "ping job handled");
        Ok::<(), anyhow::Error>(())
    });

    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_handler_succeeds() {
        let handlers = job_handlers();
        let handler = handlers.get(PING_JOB).unwrap();
        handler.handle(&Job::new(PING_JOB, serde_json::json!({}))).await.unwrap();
    }

    #[test]
    fn unknown_kinds_have_no_handler() {
        assert!(job_handlers().get("github.sync_repo").is_none());
    }
}
