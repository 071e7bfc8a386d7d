// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Streaming event types for real-time workflow observation.
//!
//! Every client-facing resumption (start, resume, respond, sub-action) can
//! be observed as a stream of these events; the HTTP layer maps them 1:1
//! onto SSE frames. The event log stays the source of truth - streams are a
//! live view, not a replacement.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Stream event tag; doubles as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SseEventType {
    /// Execution (re)entered the engine loop
    Started,
    /// Periodic heartbeat while synchronous work runs
    Progress,
    /// An interactive module suspended the run
    Interaction,
    /// Terminal success for this resumption
    Complete,
    /// Terminal failure for this resumption
    Error,
    /// Cooperative cancellation took effect
    Cancelled,
    /// State-watch stream: full snapshot of the derived state map
    StateSnapshot,
    /// State-watch stream: keys added/changed since the last snapshot
    StateUpdate,
}

impl std::fmt::Display for SseEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Interaction => "interaction",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::StateSnapshot => "state_snapshot",
            Self::StateUpdate => "state_update",
        };
        f.write_str(s)
    }
}

/// One streamed event: a tag plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEvent {
    #[serde(rename = "type")]
    pub event_type: SseEventType,
    pub data: Value,
}

impl SseEvent {
    pub fn new(event_type: SseEventType, data: Value) -> Self {
        Self { event_type, data }
    }

    pub fn started(workflow_run_id: &str, step_id: Option<&str>, module_index: usize) -> Self {
        Self::new(
            SseEventType::Started,
            json!({
                "workflow_run_id": workflow_run_id,
                "step_id": step_id,
                "module_index": module_index,
            }),
        )
    }

    pub fn progress(workflow_run_id: &str, elapsed_ms: u64, message: &str) -> Self {
        Self::new(
            SseEventType::Progress,
            json!({
                "workflow_run_id": workflow_run_id,
                "elapsed_ms": elapsed_ms,
                "message": message,
            }),
        )
    }

    pub fn interaction(data: Value) -> Self {
        Self::new(SseEventType::Interaction, data)
    }

    pub fn complete(workflow_run_id: &str, result: Map<String, Value>) -> Self {
        let mut data = Map::new();
        data.insert(
            "workflow_run_id".to_string(),
            Value::String(workflow_run_id.to_string()),
        );
        for (key, value) in result {
            data.insert(key, value);
        }
        Self::new(SseEventType::Complete, Value::Object(data))
    }

    pub fn error(workflow_run_id: &str, message: &str) -> Self {
        Self::new(
            SseEventType::Error,
            json!({"workflow_run_id": workflow_run_id, "message": message}),
        )
    }

    pub fn cancelled(workflow_run_id: &str, reason: &str) -> Self {
        Self::new(
            SseEventType::Cancelled,
            json!({"workflow_run_id": workflow_run_id, "reason": reason}),
        )
    }

    pub fn state_snapshot(workflow_run_id: &str, state: &Map<String, Value>) -> Self {
        Self::new(
            SseEventType::StateSnapshot,
            json!({"workflow_run_id": workflow_run_id, "state": state}),
        )
    }

    pub fn state_update(workflow_run_id: &str, changed: Map<String, Value>) -> Self {
        Self::new(
            SseEventType::StateUpdate,
            json!({"workflow_run_id": workflow_run_id, "changed": changed}),
        )
    }
}
