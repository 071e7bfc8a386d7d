// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interaction handler - resumes a suspended module with the client's
//! response and hands control back to the executor.
//!
//! The module is re-invoked with the resolved inputs stored in the original
//! `interaction_requested` payload; re-resolving is only a fallback for
//! events written before inputs were embedded. Retry/jump flags in the
//! module's outputs are consumed here, never by the executor.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::engine::{
    ExecutionServices, ModuleRegistry, ParameterResolver, RegisteredModule, ResolverScope,
    TemplateResolver,
};
use crate::models::{
    EventType, InteractionResponseData, ResolvedWorkflow, RetryMode, RunStatus, WorkflowResponse,
};
use crate::utils::sanitize_error_message;
use crate::workflow::executor::WorkflowExecutor;
use crate::workflow::navigation::NavigationHandler;
use std::sync::Arc;

/// Processes interaction responses and continues execution.
#[derive(Clone)]
pub struct InteractionHandler {
    db: Database,
    registry: Arc<ModuleRegistry>,
    executor: WorkflowExecutor,
    navigator: NavigationHandler,
    resolver: Arc<dyn ParameterResolver>,
}

impl InteractionHandler {
    pub fn new(
        db: Database,
        registry: Arc<ModuleRegistry>,
        executor: WorkflowExecutor,
        navigator: NavigationHandler,
    ) -> Self {
        Self {
            db,
            registry,
            executor,
            navigator,
            resolver: Arc::new(TemplateResolver),
        }
    }

    /// Continues execution after an `interaction_response` event has been
    /// appended: re-invokes the suspended module with the response, stores
    /// its outputs, finishes the step, then resumes the run.
    #[instrument(name = "continue_after_interaction", skip_all, fields(run = %workflow_run_id))]
    pub async fn continue_after_interaction(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        services: &ExecutionServices,
        response: &InteractionResponseData,
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
                "No pending interaction found",
            ));
        };

        let step_id = last_interaction.step_id.clone().unwrap_or_default();
        let module_name = last_interaction.module_name.clone().unwrap_or_default();

        let Some((step_index, step)) = workflow_def.find_step(&step_id) else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("Step '{}' not found", step_id),
            ));
        };

        let Some(module_index) = step
            .modules
            .iter()
            .position(|m| m.effective_name() == module_name)
        else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("Module '{}' not found in step", module_name),
            ));
        };
        let module_def = &step.modules[module_index];

        let mut state = self
            .db
            .state
            .get_module_outputs(workflow_run_id, None)
            .await?;

        let module = match self.registry.validate(&module_def.module_id) {
            Ok(module) => module.clone(),
            Err(message) => return Ok(WorkflowResponse::error(workflow_run_id, message)),
        };
        let RegisteredModule::Interactive(interactive) = &module else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("Module '{}' is not interactive", module_def.module_id),
            ));
        };

        // Prefer the inputs resolved when the interaction was requested
        let resolved_inputs = match last_interaction
            .data
            .get("_resolved_inputs")
            .and_then(Value::as_object)
        {
            Some(stored) => {
                debug!("Using stored resolved inputs");
                stored.clone()
            }
            None => {
                warn!("No stored resolved inputs, re-resolving");
                let scope = ResolverScope {
                    state: &state,
                    step: Some(step),
                    config: &workflow_def.config,
                };
                self.resolver.resolve(&module_def.inputs, &scope)
            }
        };

        let mut ctx = self.executor.build_context(
            workflow_run_id,
            state.clone(),
            services,
            workflow_def,
            module_def,
            &step_id,
            module_index,
            cancel.clone(),
        );
        ctx.addons = self
            .executor
            .setup_addons(module_def, &state, step, workflow_def);

        let outputs = match interactive
            .execute_with_response(&resolved_inputs, &ctx, response)
            .await
        {
            Ok(outputs) => outputs,
            Err(e) => {
                return Ok(WorkflowResponse::error(
                    workflow_run_id,
                    format!(
                        "Module execution failed: {}",
                        sanitize_error_message(&e.to_string())
                    ),
                ));
            }
        };

        // Modules may escalate to navigation instead of producing outputs
        if outputs
            .get("retry_requested")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return self
                .handle_retry_from_outputs(workflow_run_id, workflow_def, module_def, &outputs, services, cancel)
                .await;
        }
        if outputs
            .get("jump_back_requested")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return self
                .handle_jump_from_outputs(workflow_run_id, workflow_def, module_def, &outputs, services, cancel)
                .await;
        }

        self.executor
            .store_module_outputs(
                workflow_run_id,
                &step_id,
                &module_name,
                module_def,
                outputs,
                &mut state,
            )
            .await?;

        // Remaining modules of this step
        let result = self
            .executor
            .execute_step_modules(
                workflow_run_id,
                step,
                module_index + 1,
                &mut state,
                services,
                workflow_def,
                cancel.clone(),
            )
            .await?;

        if result.status != RunStatus::Processing {
            return Ok(result);
        }

        // Step finished - seal it and carry on with the rest of the run
        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::StepCompleted,
                crate::db::EventWrite {
                    step_id: Some(step_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        if step_index + 1 < workflow_def.steps.len() {
            let position = self
                .db
                .state
                .get_workflow_position(workflow_run_id, None)
                .await?;
            return self
                .executor
                .execute_from_position(workflow_run_id, workflow_def, &position, services, cancel)
                .await;
        }

        self.db
            .runs
            .update_workflow_status(workflow_run_id, RunStatus::Completed, None, None, None)
            .await?;
        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::WorkflowCompleted,
                crate::db::EventWrite::default(),
            )
            .await?;

        let final_state = self
            .db
            .state
            .get_module_outputs(workflow_run_id, None)
            .await?;
        Ok(WorkflowResponse::completed(workflow_run_id, final_state))
    }

    async fn handle_retry_from_outputs(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        module_def: &crate::models::ModuleDef,
        outputs: &Map<String, Value>,
        services: &ExecutionServices,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let mut target_module = None;
        let mut default_feedback = String::new();
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

        let Some(target_module) = target_module else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                "Retry requested but no target module configured",
            ));
        };

        let feedback = outputs
            .get("retry_feedback")
            .and_then(Value::as_str)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .unwrap_or(default_feedback);

        self.navigator
            .retry(
                workflow_run_id,
                workflow_def,
                &target_module,
                Some(&feedback),
                services,
                cancel,
            )
            .await
    }

    async fn handle_jump_from_outputs(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        module_def: &crate::models::ModuleDef,
        outputs: &Map<String, Value>,
        services: &ExecutionServices,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let jump_target = outputs
            .get("jump_back_target")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut target = None;
        if let Some(retryable) = &module_def.retryable {
            for opt in &retryable.options {
                if opt.mode == RetryMode::Jump
                    && (opt.target_module.as_deref() == Some(jump_target)
                        || opt.id.as_deref() == Some(jump_target))
                {
                    if let (Some(step), Some(module)) = (&opt.target_step, &opt.target_module) {
                        target = Some((step.clone(), module.clone()));
                    }
                    break;
                }
            }
        }

        let Some((target_step, target_module)) = target else {
            warn!(target = %jump_target, "Jump target not found in retryable options");
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("Jump target '{}' not found", jump_target),
            ));
        };

        self.navigator
            .jump(
                workflow_run_id,
                workflow_def,
                &target_step,
                &target_module,
                services,
                cancel,
            )
            .await
    }
}
