// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Workflow execution engine.
//!
//! The executor advances a run from its derived position until the next
//! interaction, an error, or completion. Every effect lands in the event
//! log before the loop moves on; the in-memory state map is only a replay
//! cache. Cancellation is checked between modules; a cancelled run keeps
//! every event already appended.

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

use crate::db::{Database, EventWrite};
use crate::engine::{
    AddonProcessor, ExecutionContext, ExecutionServices, ModuleRegistry, ParameterResolver,
    RegisteredModule, ResolverScope, TemplateResolver,
};
use crate::error::EngineError;
use crate::models::{
    EventType, ModuleDef, ResolvedWorkflow, RetryContext, RunStatus, StepDef, WorkflowPosition,
    WorkflowProgress, WorkflowResponse,
};
use crate::modules::{RETRY_FEEDBACK_KEY, RETRY_HISTORY_KEY};
use crate::utils::{get_nested_value, render_step_name, sanitize_error_message};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes workflow steps and modules.
#[derive(Clone)]
pub struct WorkflowExecutor {
    db: Database,
    registry: Arc<ModuleRegistry>,
    resolver: Arc<dyn ParameterResolver>,
}

impl WorkflowExecutor {
    pub fn new(db: Database, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            db,
            registry,
            resolver: Arc::new(TemplateResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ParameterResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Executes from the derived position until interaction, error, or
    /// completion.
    #[instrument(name = "execute_from_position", skip_all, fields(run = %workflow_run_id))]
    pub async fn execute_from_position(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        position: &WorkflowPosition,
        services: &ExecutionServices,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let mut state = self
            .db
            .state
            .get_module_outputs(workflow_run_id, None)
            .await?;

        let steps = &workflow_def.steps;
        let start_step_index = match &position.current_step {
            Some(current) => steps
                .iter()
                .position(|s| &s.step_id == current)
                .unwrap_or(0),
            None => steps
                .iter()
                .position(|s| !position.completed_steps.contains(&s.step_id))
                .unwrap_or(steps.len()),
        };

        for step_index in start_step_index..steps.len() {
            let step = &steps[step_index];
            if position.completed_steps.contains(&step.step_id) {
                continue;
            }

            self.db
                .events
                .store_event(
                    workflow_run_id,
                    EventType::StepStarted,
                    EventWrite {
                        step_id: Some(step.step_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;

            let step_name =
                render_step_name(step.name.as_deref().unwrap_or(&step.step_id), step_index);
            self.db
                .runs
                .update_workflow_status(
                    workflow_run_id,
                    RunStatus::Processing,
                    Some(&step.step_id),
                    Some(&step_name),
                    None,
                )
                .await?;

            let module_start = if step_index == start_step_index {
                position.current_module_index
            } else {
                0
            };

            let result = self
                .execute_step_modules(
                    workflow_run_id,
                    step,
                    module_start,
                    &mut state,
                    services,
                    workflow_def,
                    cancel.clone(),
                )
                .await?;

            match result.status {
                RunStatus::AwaitingInput | RunStatus::Error => return Ok(result),
                _ => {}
            }

            self.db
                .events
                .store_event(
                    workflow_run_id,
                    EventType::StepCompleted,
                    EventWrite {
                        step_id: Some(step.step_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.db
            .runs
            .update_workflow_status(workflow_run_id, RunStatus::Completed, None, None, None)
            .await?;
        self.db
            .events
            .store_event(workflow_run_id, EventType::WorkflowCompleted, EventWrite::default())
            .await?;

        info!("Workflow completed");
        Ok(WorkflowResponse::completed(workflow_run_id, state))
    }

    /// Executes a step's modules from `module_start`. Returns Processing
    /// when the step's modules all completed, AwaitingInput on suspension,
    /// Error on failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_step_modules(
        &self,
        workflow_run_id: &str,
        step: &StepDef,
        module_start: usize,
        state: &mut Map<String, Value>,
        services: &ExecutionServices,
        workflow_def: &ResolvedWorkflow,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let step_id = &step.step_id;

        for module_index in module_start..step.modules.len() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled.into());
            }

            let module_def = &step.modules[module_index];
            let module_id = &module_def.module_id;
            let module_name = module_def.effective_name().to_string();

            self.db
                .events
                .store_event(
                    workflow_run_id,
                    EventType::ModuleStarted,
                    EventWrite {
                        step_id: Some(step_id.clone()),
                        module_name: Some(module_name.clone()),
                        data: Some(serde_json::json!({"module_id": module_id})),
                        ..Default::default()
                    },
                )
                .await?;

            let module = match self.registry.validate(module_id) {
                Ok(module) => module.clone(),
                Err(message) => {
                    return Ok(WorkflowResponse::error(workflow_run_id, message));
                }
            };

            // resolver_schema is carried to the client, never resolved
            let resolver_schema = module_def.inputs.get("resolver_schema").cloned();

            let scope = ResolverScope {
                state,
                step: Some(step),
                config: &workflow_def.config,
            };
            let resolved_inputs = self.resolver.resolve(&module_def.inputs, &scope);

            if let Err(message) = module.validate_inputs(&resolved_inputs) {
                return Ok(WorkflowResponse::error(
                    workflow_run_id,
                    format!(
                        "Module '{}' validation failed: {}",
                        module_id,
                        sanitize_error_message(&message)
                    ),
                ));
            }

            let mut ctx = self.build_context(
                workflow_run_id,
                state.clone(),
                services,
                workflow_def,
                module_def,
                step_id,
                module_index,
                cancel.clone(),
            );

            match &module {
                RegisteredModule::Interactive(interactive) => {
                    ctx.addons = self.setup_addons(module_def, state, step, workflow_def);

                    let request = match interactive.get_interaction_request(&resolved_inputs, &ctx).await
                    {
                        Ok(request) => request,
                        Err(e) => {
                            return self
                                .record_module_error(workflow_run_id, step_id, &module_name, module_id, e)
                                .await;
                        }
                    };

                    let request_data =
                        request.to_event_data(&resolved_inputs, module_id, resolver_schema.as_ref());
                    self.db
                        .events
                        .store_event(
                            workflow_run_id,
                            EventType::InteractionRequested,
                            EventWrite {
                                step_id: Some(step_id.clone()),
                                module_name: Some(module_name.clone()),
                                data: Some(request_data.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;

                    self.db
                        .runs
                        .update_workflow_status(
                            workflow_run_id,
                            RunStatus::AwaitingInput,
                            None,
                            None,
                            Some(&module_name),
                        )
                        .await?;

                    debug!(module = %module_name, "Awaiting input");
                    return Ok(WorkflowResponse::awaiting_input(
                        workflow_run_id,
                        format!("Waiting for input at {}", module_name),
                        request_data,
                        Some(WorkflowProgress {
                            current_step: step_id.clone(),
                            current_module: module_name,
                            step_index: module_index,
                        }),
                    ));
                }
                RegisteredModule::Executable(executable) => {
                    match executable.execute(&resolved_inputs, &ctx).await {
                        Ok(outputs) => {
                            self.store_module_outputs(
                                workflow_run_id,
                                step_id,
                                &module_name,
                                module_def,
                                outputs,
                                state,
                            )
                            .await?;
                        }
                        Err(e) => {
                            return self
                                .record_module_error(workflow_run_id, step_id, &module_name, module_id, e)
                                .await;
                        }
                    }
                }
            }
        }

        Ok(WorkflowResponse::processing(
            workflow_run_id,
            format!("Step {} completed", step_id),
        ))
    }

    /// Re-enters a specific module, optionally with injected retry context.
    /// Used by retry and jump; does not continue past the step boundary.
    #[instrument(name = "execute_from_module", skip_all, fields(run = %workflow_run_id, step = %step_id, index = module_index))]
    pub async fn execute_from_module(
        &self,
        workflow_run_id: &str,
        workflow_def: &ResolvedWorkflow,
        step_id: &str,
        module_index: usize,
        services: &ExecutionServices,
        retry_context: Option<&RetryContext>,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let Some((_, step)) = workflow_def.find_step(step_id) else {
            return Ok(WorkflowResponse::error(
                workflow_run_id,
                format!("Step '{}' not found", step_id),
            ));
        };

        let mut state = self
            .db
            .state
            .get_module_outputs(workflow_run_id, None)
            .await?;

        if let Some(context) = retry_context {
            if !context.conversation_history.is_empty() {
                state.insert(
                    RETRY_HISTORY_KEY.to_string(),
                    serde_json::to_value(&context.conversation_history)?,
                );
            }
            if let Some(feedback) = &context.feedback {
                state.insert(RETRY_FEEDBACK_KEY.to_string(), Value::String(feedback.clone()));
            }
        }

        self.execute_step_modules(
            workflow_run_id,
            step,
            module_index,
            &mut state,
            services,
            workflow_def,
            cancel,
        )
        .await
    }

    /// Applies `outputs_to_state`, appends `module_completed` with raw
    /// outputs plus the `_state_mapped` projection, and merges the
    /// projection into the live state map.
    pub async fn store_module_outputs(
        &self,
        workflow_run_id: &str,
        step_id: &str,
        module_name: &str,
        module_def: &ModuleDef,
        outputs: Map<String, Value>,
        state: &mut Map<String, Value>,
    ) -> anyhow::Result<()> {
        let outputs_value = Value::Object(outputs.clone());
        let mut state_mapped = Map::new();
        for (output_path, state_key) in &module_def.outputs_to_state {
            let value = get_nested_value(&outputs_value, output_path)
                .cloned()
                .unwrap_or(Value::Null);
            // A single output path may feed several state keys
            let keys: Vec<String> = match state_key {
                Value::String(key) => vec![key.clone()],
                Value::Array(keys) => keys
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => continue,
            };
            for key in keys {
                state.insert(key.clone(), value.clone());
                state_mapped.insert(key, value.clone());
            }
        }

        let mut event_data = outputs;
        event_data.insert("_state_mapped".to_string(), Value::Object(state_mapped));

        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::ModuleCompleted,
                EventWrite {
                    step_id: Some(step_id.to_string()),
                    module_name: Some(module_name.to_string()),
                    data: Some(Value::Object(event_data)),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Resolves addon inputs and builds the processor attached before
    /// `get_interaction_request`.
    pub fn setup_addons(
        &self,
        module_def: &ModuleDef,
        state: &Map<String, Value>,
        step: &StepDef,
        workflow_def: &ResolvedWorkflow,
    ) -> Option<AddonProcessor> {
        if module_def.addons.is_empty() {
            return None;
        }
        let scope = ResolverScope {
            state,
            step: Some(step),
            config: &workflow_def.config,
        };
        Some(AddonProcessor::from_configs(
            &module_def.addons,
            self.resolver.as_ref(),
            &scope,
        ))
    }

    /// Builds the per-module execution context.
    #[allow(clippy::too_many_arguments)]
    pub fn build_context(
        &self,
        workflow_run_id: &str,
        state: Map<String, Value>,
        services: &ExecutionServices,
        workflow_def: &ResolvedWorkflow,
        module_def: &ModuleDef,
        step_id: &str,
        module_index: usize,
        cancel: CancellationToken,
    ) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(
            workflow_run_id,
            self.db.clone(),
            state,
            services.clone(),
            workflow_def.config.clone(),
            cancel,
        );
        ctx.step_id = Some(step_id.to_string());
        ctx.current_module_name = Some(module_def.effective_name().to_string());
        ctx.current_module_index = module_index;
        ctx.retryable = module_def.retryable.clone();
        ctx.sub_actions = module_def.sub_actions.clone();
        ctx
    }

    async fn record_module_error(
        &self,
        workflow_run_id: &str,
        step_id: &str,
        module_name: &str,
        module_id: &str,
        error: anyhow::Error,
    ) -> anyhow::Result<WorkflowResponse> {
        // Cancellation is not a module failure; surface it unchanged so the
        // stream can emit `cancelled` without writing an error event.
        if matches!(error.downcast_ref::<EngineError>(), Some(EngineError::Cancelled)) {
            return Err(error);
        }

        let sanitized = sanitize_error_message(&error.to_string());
        error!(module = %module_id, error = %sanitized, "Module failed");

        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::ModuleError,
                EventWrite {
                    step_id: Some(step_id.to_string()),
                    module_name: Some(module_name.to_string()),
                    data: Some(serde_json::json!({"error": sanitized})),
                    ..Default::default()
                },
            )
            .await?;

        self.db
            .runs
            .update_workflow_status(workflow_run_id, RunStatus::Error, None, None, None)
            .await?;

        Ok(WorkflowResponse::error(
            workflow_run_id,
            format!("Module '{}' failed: {}", module_id, sanitized),
        ))
    }
}
