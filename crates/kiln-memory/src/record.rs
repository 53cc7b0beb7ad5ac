//! Memory record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one completed task run
///
/// Records are never edited once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub task: String,
    pub code: String,
    pub success: bool,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(task: impl Into<String>, code: impl Into<String>, success: bool, attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            code: code.into(),
            success,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A past record judged relevant to a new task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lesson {
    pub record: MemoryRecord,
    /// Similarity to the queried task, in (0, 1]
    pub similarity: f64,
}
