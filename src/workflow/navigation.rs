// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Navigation: retry and jump.
//!
//! Retry re-executes a module on the current branch with the prior
//! conversation injected; jump forks a new branch just before the target
//! module and re-enters clean. Loops in workflows are exactly these two
//! primitives - the step list itself is acyclic.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::db::{Database, EventWrite};
use crate::engine::ExecutionServices;
use crate::models::{
    EventType, InteractionResponseData, ResolvedWorkflow, RetryMode, WorkflowResponse,
};
use crate::workflow::executor::WorkflowExecutor;

/// Handles retry and jump operations.
#[derive(Clone)]
pub struct NavigationHandler {
    db: Database,
    executor: WorkflowExecutor,
}

impl NavigationHandler {
    pub fn new(db: Database, executor: WorkflowExecutor) -> Self {
        Self { db, executor }
    }

    /// Re-executes `target_module` with optional feedback. Stays on the
    /// current branch; prior outputs and feedback become conversation
    /// history for the module's next LLM call.
    #[instrument(name = "navigate_retry", skip(self, workflow_def, services, cancel), fields(run = %workflow_run_id, module = %target_module))]
    pub async fn retry(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        target_module: &str,
        feedback: Option<&str>,
        services: &ExecutionServices,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::RetryRequested,
                EventWrite {
                    data: Some(json!({
                        "target_module": target_module,
                        "feedback": feedback,
                    })),
                    ..Default::default()
                },
            )
            .await?;

        let Some((step_id, module_index)) = workflow_def.find_module(target_module) else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("Target module '{}' not found", target_module),
            ));
        };
        let step_id = step_id.to_string();

        let retry_context = self
            .db
            .state
            .get_retry_context(workflow_run_id, target_module)
            .await?;

        self.executor
            .execute_from_module(
                workflow_run_id,
                workflow_def,
                &step_id,
                module_index,
                services,
                Some(&retry_context),
                cancel,
            )
            .await
    }

    /// Forks a new branch just before `target_module` and re-enters there
    /// with no injected context. State after the fork point is gone on the
    /// new branch; history on old branches is untouched.
    #[instrument(name = "navigate_jump", skip(self, workflow_def, services, cancel), fields(run = %workflow_run_id, step = %target_step, module = %target_module))]
    pub async fn jump(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        target_step: &str,
        target_module: &str,
        services: &ExecutionServices,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let Some(module_index) = workflow_def.find_module_in_step(target_step, target_module) else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!(
                    "Target module '{}' not found in step '{}'",
                    target_module, target_step
                ),
            ));
        };

        // The target's events may be absent (e.g. it never ran on this
        // lineage); execute directly in that case instead of failing.
        let new_branch_id = match self
            .db
            .state
            .jump_to_module(workflow_run_id, target_step, target_module)
            .await
        {
            Ok(branch) => {
                info!(branch = %branch, "Jump created branch");
                Some(branch)
            }
            Err(e) => {
                warn!(error = %e, "Could not create jump branch, executing directly");
                None
            }
        };

        // Lands on the new branch: jump_to_module already moved the run's
        // current-branch pointer.
        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::JumpRequested,
                EventWrite {
                    data: Some(json!({
                        "target_step": target_step,
                        "target_module": target_module,
                        "new_branch_id": new_branch_id,
                    })),
                    ..Default::default()
                },
            )
            .await?;

        self.executor
            .execute_from_module(
                workflow_run_id,
                workflow_def,
                target_step,
                module_index,
                services,
                None,
                cancel,
            )
            .await
    }

    /// True when a response asks for a retry: a selected option marked
    /// `is_retry` (or with id "retry"), or free-form feedback with no
    /// selection.
    pub fn is_retry_response(&self, response: &InteractionResponseData) -> bool {
        if response.selected_options.iter().any(|o| o.is_retry()) {
            return true;
        }
        response.selected_options.is_empty()
            && response
                .custom_value
                .as_deref()
                .map(|v| !v.is_empty())
                .unwrap_or(false)
    }

    /// Retry entry point for a user-selected retry option: resolves the
    /// target and default feedback from the pending module's retryable
    /// config.
    pub async fn handle_retry_from_response(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        response: &InteractionResponseData,
        services: &ExecutionServices,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let Some(last_interaction) = self
            .db
            .events
            .get_latest_event(workflow_run_id, EventType::InteractionRequested)
            .await?
        else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                "No interaction context for retry",
            ));
        };

        let module_name = last_interaction.module_name.as_deref().unwrap_or_default();
        let step_id = last_interaction.step_id.as_deref().unwrap_or_default();

        let mut target_module = None;
        let mut default_feedback = String::new();
        if let Some(module_def) = workflow_def.module_config(step_id, module_name) {
            if let Some(retryable) = &module_def.retryable {
                for opt in &retryable.options {
                    if opt.mode == RetryMode::Retry {
                        target_module = opt.target_module.clone();
                        default_feedback = opt
                            .feedback
                            .as_ref()
                            .map(|f| f.default_message.clone())
                            .unwrap_or_default();
                        break;
                    }
                }
            }
        }

        let Some(target_module) = target_module else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("No retry target configured for {}", module_name),
            ));
        };

        let feedback = response
            .custom_value
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or(default_feedback);

        self.retry(
            workflow_run_id,
            workflow_def,
            &target_module,
            Some(&feedback),
            services,
            cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::ModuleRegistry;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn handler() -> (tempfile::TempDir, NavigationHandler) {
        let temp_dir = tempdir().unwrap();
        let db = Database::open(temp_dir.path().join("db").to_str().unwrap())
            .await
            .unwrap();
        let executor = WorkflowExecutor::new(db.clone(), Arc::new(ModuleRegistry::with_builtins()));
        (temp_dir, NavigationHandler::new(db, executor))
    }

    #[tokio::test]
    async fn test_is_retry_response_predicate() {
        let (_tmp, nav) = handler().await;

        let retry_by_metadata: InteractionResponseData = serde_json::from_value(json!({
            "selected_options": [{"id": "x", "label": "x", "metadata": {"is_retry": true}}]
        }))
        .unwrap();
        assert!(nav.is_retry_response(&retry_by_metadata));

        let retry_by_id: InteractionResponseData = serde_json::from_value(json!({
            "selected_options": [{"id": "retry", "label": "Try again"}]
        }))
        .unwrap();
        assert!(nav.is_retry_response(&retry_by_id));

        let feedback_only: InteractionResponseData =
            serde_json::from_value(json!({"custom_value": "more dramatic"})).unwrap();
        assert!(nav.is_retry_response(&feedback_only));

        let empty_feedback: InteractionResponseData =
            serde_json::from_value(json!({"custom_value": ""})).unwrap();
        assert!(!nav.is_retry_response(&empty_feedback));

        let normal: InteractionResponseData = serde_json::from_value(json!({
            "selected_options": [{"id": "b", "label": "b"}]
        }))
        .unwrap();
        assert!(!nav.is_retry_response(&normal));
    }
}
