// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Task model for the background work queue.
//!
//! Queue tasks are orthogonal to workflow events: they carry opaque payloads
//! for worker processes (media generation, long fetches) and coordinate only
//! through the queue's atomic claim. Rows track:
//! - Priority (higher first) and FIFO order within a priority
//! - Status (queued/processing/completed/failed)
//! - Heartbeats for stale-task recovery
//! - Concurrency identifiers with per-identifier limits

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Queue task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker
    #[default]
    Queued,
    /// Claimed by a worker, heartbeating
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error (terminal)
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Worker-reported progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub elapsed_ms: u64,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    pub fn queued() -> Self {
        Self {
            elapsed_ms: 0,
            message: "Queued".to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Structured failure record stored on the task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub stack_trace: String,
}

/// A task row in the persisted queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub task_id: String,
    /// Dispatch key naming the worker class (e.g. "media")
    pub actor: String,
    pub status: TaskStatus,
    /// Higher priority tasks are claimed first
    #[serde(default)]
    pub priority: i64,
    /// Set at claim time; groups tasks under a shared limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<i64>,
    /// Opaque to the queue
    #[serde(default)]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Raw provider response, kept alongside the picked result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub progress: TaskProgress,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
}

fn default_max_retries() -> i64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_queued_progress_message() {
        let progress = TaskProgress::queued();
        assert_eq!(progress.message, "Queued");
        assert_eq!(progress.elapsed_ms, 0);
    }

    #[test]
    fn test_task_error_type_field_name() {
        let error = TaskError {
            error_type: "MaxRetriesExceeded".to_string(),
            message: "Task failed after 3 retries".to_string(),
            details: Value::Null,
            stack_trace: String::new(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "MaxRetriesExceeded");
    }
}
