// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine responses returned by the executor, interaction handler and
//! processor entry points.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::run::RunStatus;
use crate::diff::WorkflowDiff;

/// Coarse progress info attached to awaiting-input responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub current_step: String,
    pub current_module: String,
    pub step_index: usize,
}

/// Outcome of driving a run: processing (step boundary), awaiting input,
/// completed, or error. Mirrors the run status it leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub workflow_run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full serialized interaction request when awaiting input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_request: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<WorkflowProgress>,
    /// Final state map when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
}

impl WorkflowResponse {
    pub fn processing(workflow_run_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            status: RunStatus::Processing,
            message: Some(message.into()),
            error: None,
            interaction_request: None,
            progress: None,
            result: None,
        }
    }

    pub fn awaiting_input(
        workflow_run_id: impl Into<String>,
        message: impl Into<String>,
        interaction_request: Value,
        progress: Option<WorkflowProgress>,
    ) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            status: RunStatus::AwaitingInput,
            message: Some(message.into()),
            error: None,
            interaction_request: Some(interaction_request),
            progress,
            result: None,
        }
    }

    pub fn completed(workflow_run_id: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            status: RunStatus::Completed,
            message: Some("Workflow completed successfully".to_string()),
            error: None,
            interaction_request: None,
            progress: None,
            result: Some(result),
        }
    }

    pub fn error(workflow_run_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            status: RunStatus::Error,
            message: None,
            error: Some(error.into()),
            interaction_request: None,
            progress: None,
            result: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == RunStatus::Error
    }
}

/// Result of a start/resume call that may require the caller to confirm a
/// definition change before anything is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartResult {
    /// The submitted content differs from the stored source version; the
    /// caller must confirm before the new version is written.
    RequiresConfirmation {
        requires_confirmation: bool,
        version_diff: WorkflowDiff,
        old_hash: String,
        new_hash: String,
    },
    /// Execution proceeded (new run, resumed run, or pending interaction).
    Response(WorkflowResponse),
}

impl StartResult {
    /// Unwraps the response variant; panics on confirmation results.
    /// Intended for tests and callers that passed `force` flows.
    pub fn into_response(self) -> WorkflowResponse {
        match self {
            Self::Response(response) => response,
            Self::RequiresConfirmation { .. } => {
                panic!("start result requires confirmation")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_constructors() {
        let r = WorkflowResponse::processing("wf_1", "Step step1 completed");
        assert_eq!(r.status, RunStatus::Processing);
        assert!(r.error.is_none());

        let r = WorkflowResponse::error("wf_1", "boom");
        assert!(r.is_error());
        assert_eq!(r.error.as_deref(), Some("boom"));

        let r = WorkflowResponse::completed("wf_1", Map::new());
        assert_eq!(r.status, RunStatus::Completed);
        assert!(r.result.is_some());
    }

    #[test]
    fn test_awaiting_input_serialization_keeps_request() {
        let r = WorkflowResponse::awaiting_input(
            "wf_1",
            "Waiting for input at moduleB",
            serde_json::json!({"interaction_id": "int_1"}),
            Some(WorkflowProgress {
                current_step: "step2".to_string(),
                current_module: "moduleB".to_string(),
                step_index: 0,
            }),
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "awaiting_input");
        assert_eq!(json["interaction_request"]["interaction_id"], "int_1");
        assert_eq!(json["progress"]["current_step"], "step2");
    }
}
