//! Core job types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use grainlify_core::JobId;

use crate::retry::RetryPolicy;

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    Completed,
    /// Failed, will be retried at `run_at`
    Failed { error: String, attempt: u32 },
    /// Exhausted retries
    DeadLettered { error: String, attempts: u32 },
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
            JobStatus::DeadLettered { .. } => "dead_lettered",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Rebuild a status from its stored parts.
    pub fn from_parts(status: &str, error: Option<String>, attempt: u32) -> Option<Self> {
        let error = error.unwrap_or_default();
        Some(match status {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed { error, attempt },
            "dead_lettered" => JobStatus::DeadLettered {
                error,
                attempts: attempt,
            },
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobStatus::Failed { error, .. } | JobStatus::DeadLettered { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::DeadLettered { .. } | JobStatus::Cancelled
        )
    }

    /// Eligible to be claimed.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed { .. })
    }
}

/// A background sync job (e.g. `github.sync_repo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Routing key for the handler registry.
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Attempts started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind: kind.into(),
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            run_at: now,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.run_at
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Record a failed attempt: schedule a retry, or dead-letter when the
    /// policy is exhausted.
    pub fn mark_failed(&mut self, error: String) {
        let now = Utc::now();
        self.updated_at = now;

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            self.status = JobStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.status = JobStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new("github.sync_repo", serde_json::json!({"repo": "a/b"}));

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.is_ready(Utc::now()));

        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempt, 1);

        job.mark_completed();
        assert!(job.status.is_terminal());
    }

    #[test]
    fn failure_schedules_retry_then_dead_letters() {
        let mut job = Job::new("github.sync_repo", serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(30)));

        job.mark_running();
        job.mark_failed("rate limited".to_string());
        assert!(matches!(job.status, JobStatus::Failed { attempt: 1, .. }));
        assert!(!job.is_ready(Utc::now()));

        job.mark_running();
        job.mark_failed("rate limited".to_string());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 2, .. }));
        assert_eq!(job.status.error(), Some("rate limited"));
    }

    #[test]
    fn status_survives_storage_round_trip() {
        let status = JobStatus::Failed {
            error: "boom".to_string(),
            attempt: 3,
        };
        let rebuilt = JobStatus::from_parts(status.as_str(), status.error().map(str::to_string), 3);
        assert_eq!(rebuilt, Some(status));
        assert_eq!(JobStatus::from_parts("exploded", None, 0), None);
    }
}
