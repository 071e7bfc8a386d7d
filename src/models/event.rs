// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event model - the immutable records that make up a run's history.
//!
//! Events are the sole source of truth for a run. Position, state and
//! interaction history are all derived by replaying them; nothing in the
//! engine ever updates an event in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of a workflow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Run was created (or force-reset)
    WorkflowCreated,
    /// All steps finished
    WorkflowCompleted,
    /// Recovery forked a new branch after a status inconsistency
    WorkflowRecovered,
    /// A step began executing
    StepStarted,
    /// All modules of a step completed
    StepCompleted,
    /// A module began executing
    ModuleStarted,
    /// A module finished; carries raw outputs plus the `_state_mapped` projection
    ModuleCompleted,
    /// A module raised; carries the sanitized error message
    ModuleError,
    /// An interactive module suspended the run
    InteractionRequested,
    /// The client answered a pending interaction
    InteractionResponse,
    /// A retry was issued for a module (stays on the current branch)
    RetryRequested,
    /// A jump forked a new branch at an earlier point
    JumpRequested,
    /// A sub-action was launched from inside an interaction
    SubActionStarted,
    /// A sub-action finished; carries `child_state` and `_state_mapped`
    SubActionCompleted,
}

impl EventType {
    /// String form as persisted in the `events` collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowCreated => "workflow_created",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowRecovered => "workflow_recovered",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::ModuleStarted => "module_started",
            Self::ModuleCompleted => "module_completed",
            Self::ModuleError => "module_error",
            Self::InteractionRequested => "interaction_requested",
            Self::InteractionResponse => "interaction_response",
            Self::RetryRequested => "retry_requested",
            Self::JumpRequested => "jump_requested",
            Self::SubActionStarted => "sub_action_started",
            Self::SubActionCompleted => "sub_action_completed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_created" => Ok(Self::WorkflowCreated),
            "workflow_completed" => Ok(Self::WorkflowCompleted),
            "workflow_recovered" => Ok(Self::WorkflowRecovered),
            "step_started" => Ok(Self::StepStarted),
            "step_completed" => Ok(Self::StepCompleted),
            "module_started" => Ok(Self::ModuleStarted),
            "module_completed" => Ok(Self::ModuleCompleted),
            "module_error" => Ok(Self::ModuleError),
            "interaction_requested" => Ok(Self::InteractionRequested),
            "interaction_response" => Ok(Self::InteractionResponse),
            "retry_requested" => Ok(Self::RetryRequested),
            "jump_requested" => Ok(Self::JumpRequested),
            "sub_action_started" => Ok(Self::SubActionStarted),
            "sub_action_completed" => Ok(Self::SubActionCompleted),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// A single immutable event in a run's log.
///
/// Event ids are time-sortable (uuid7 hex behind a fixed prefix), so lexical
/// order on `event_id` equals creation order across all branches of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Monotonically increasing, time-sortable identifier
    pub event_id: String,
    /// Run this event belongs to
    pub workflow_run_id: String,
    /// Branch this event was appended on
    pub branch_id: String,
    /// Version the run was executing when the event was appended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_version_id: Option<String>,
    /// Event type tag
    pub event_type: EventType,
    /// Step the event relates to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Module the event relates to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    /// Arbitrary event payload
    #[serde(default)]
    pub data: Value,
    /// Wall-clock append time
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    /// Returns the `_state_mapped` projection from the payload, if present.
    pub fn state_mapped(&self) -> Option<&serde_json::Map<String, Value>> {
        self.data.get("_state_mapped").and_then(Value::as_object)
    }

    /// Returns the `interaction_id` embedded in the payload, if present.
    pub fn interaction_id(&self) -> Option<&str> {
        self.data.get("interaction_id").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        let all = [
            EventType::WorkflowCreated,
            EventType::WorkflowCompleted,
            EventType::WorkflowRecovered,
            EventType::StepStarted,
            EventType::StepCompleted,
            EventType::ModuleStarted,
            EventType::ModuleCompleted,
            EventType::ModuleError,
            EventType::InteractionRequested,
            EventType::InteractionResponse,
            EventType::RetryRequested,
            EventType::JumpRequested,
            EventType::SubActionStarted,
            EventType::SubActionCompleted,
        ];
        for ty in all {
            let parsed: EventType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn test_event_type_serde_snake_case() {
        let json = serde_json::to_string(&EventType::InteractionRequested).unwrap();
        assert_eq!(json, "\"interaction_requested\"");
        let back: EventType = serde_json::from_str("\"module_completed\"").unwrap();
        assert_eq!(back, EventType::ModuleCompleted);
    }

    #[test]
    fn test_event_state_mapped_accessor() {
        let event = WorkflowEvent {
            event_id: "evt_1".to_string(),
            workflow_run_id: "wf_1".to_string(),
            branch_id: "br_1".to_string(),
            workflow_version_id: None,
            event_type: EventType::ModuleCompleted,
            step_id: Some("step1".to_string()),
            module_name: Some("moduleA".to_string()),
            data: serde_json::json!({"greeting": "hi", "_state_mapped": {"g": "hi"}}),
            timestamp: Utc::now(),
        };
        let mapped = event.state_mapped().unwrap();
        assert_eq!(mapped.get("g").unwrap(), "hi");
        assert!(event.interaction_id().is_none());
    }
}
