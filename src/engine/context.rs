// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Execution context passed to modules.
//!
//! Carries the state snapshot, injected services and cancellation token.
//! Contexts are rebuilt per module invocation from the executor's state -
//! state maps are never shared across runs.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::db::{Database, TaskQueue};
use crate::engine::addons::AddonProcessor;
use crate::llm::LlmClient;
use crate::models::{RetryableConfig, SubActionDef};

/// Injected collaborators, assembled once per client call.
#[derive(Clone, Default)]
pub struct ExecutionServices {
    pub ai_config: Value,
    pub workflow_run_id: String,
    pub project_name: String,
    pub workflow_template_name: String,
    pub workflow_template_id: String,
    pub user_id: String,
    pub branch_id: String,
    /// Timestamp tag for artifacts produced in this session
    pub session_timestamp: String,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub http: Option<reqwest::Client>,
    pub queue: Option<TaskQueue>,
}

/// Per-module execution context.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workflow_run_id: String,
    pub db: Database,
    /// Snapshot of the flat state map at invocation time
    pub state: Map<String, Value>,
    pub services: ExecutionServices,
    /// Workflow-level config block
    pub config: Map<String, Value>,
    pub step_id: Option<String>,
    pub current_module_name: Option<String>,
    pub current_module_index: usize,
    pub retryable: Option<RetryableConfig>,
    pub sub_actions: Vec<SubActionDef>,
    /// Cooperative cancellation; checked between modules and inside
    /// streaming module implementations
    pub cancel: CancellationToken,
    /// Resolved addon configurations, attached before
    /// `get_interaction_request` when the module declares addons
    pub addons: Option<AddonProcessor>,
}

impl ExecutionContext {
    pub fn new(
        workflow_run_id: &str,
        db: Database,
        state: Map<String, Value>,
        services: ExecutionServices,
        config: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_run_id: workflow_run_id.to_string(),
            db,
            state,
            services,
            config,
            step_id: None,
            current_module_name: None,
            current_module_index: 0,
            retryable: None,
            sub_actions: Vec::new(),
            cancel,
            addons: None,
        }
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Context handed to a module's self-driven sub-action.
#[derive(Clone)]
pub struct SubActionContext {
    pub workflow_run_id: String,
    pub execution_id: String,
    pub interaction_id: String,
    pub db: Database,
    pub services: ExecutionServices,
    /// Static action params merged with caller-supplied params
    pub params: Map<String, Value>,
    pub cancel: CancellationToken,
}
