use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for a message on the bus.
///
/// Notes:
/// - `subject` routes the message (e.g. `sync.jobs.github_repo`).
/// - `payload` is opaque to the bus; consumers own its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    message_id: Uuid,
    subject: String,
    published_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            subject: subject.into(),
            published_at: Utc::now(),
            payload,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn into_payload(self) -> serde_json::Value {
        self.payload
    }
}
