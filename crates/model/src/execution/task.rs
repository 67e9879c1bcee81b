use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work handed to workers through the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub job_id: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub retries: u32,
    pub max_retries: u32,
}

impl Task {
    pub fn new(job_id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            priority,
            created_at: Utc::now(),
            payload: None,
            retries: 0,
            max_retries: 3,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
