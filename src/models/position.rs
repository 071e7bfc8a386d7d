// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Derived position and retry context.
//!
//! Both are pure functions of the event log and branch graph - the engine
//! recomputes them on every entry instead of trusting cached pointers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ChatMessage;

/// Current position of a run, derived from lineage events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPosition {
    /// Latest started-but-not-completed step, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Count of modules already completed within the current step
    #[serde(default)]
    pub current_module_index: usize,
    /// Step ids with a `step_completed` event on the lineage
    #[serde(default)]
    pub completed_steps: Vec<String>,
    /// Payload of the latest unanswered `interaction_requested`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interaction: Option<Value>,
}

/// Conversation context injected when a module is retried.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryContext {
    /// Alternating assistant (prior outputs) / user (feedback) turns
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    /// Most recent retry feedback, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl RetryContext {
    pub fn is_empty(&self) -> bool {
        self.conversation_history.is_empty() && self.feedback.is_none()
    }
}
