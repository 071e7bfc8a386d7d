// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sub-action runner - nested operations inside a pending interaction.
//!
//! A sub-action runs while the parent interaction stays open: no
//! `interaction_response` is written and the executor is not re-entered.
//! `target_sub_action` clones referenced non-interactive modules into a
//! hidden child run seeded with the parent's state; `self_sub_action`
//! delegates to the module's own driver. Either way the parent gains
//! exactly one `sub_action_completed` event carrying the mapped result.
//!
//! On failure the stream emits `error` and the log keeps the
//! `sub_action_started` without a completion; there is no failure event.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::db::{ids, Database, EventWrite};
use crate::engine::{ExecutionServices, ModuleRegistry, RegisteredModule, SubActionContext};
use crate::models::{
    EventType, ModuleDef, ResolvedWorkflow, RunStatus, SseEvent, StepDef, SubActionAction,
    SubActionDef, SubActionType, WorkflowEvent,
};
use crate::utils::{deep_merge, get_nested_value, sanitize_error_message, set_nested_value};
use crate::workflow::executor::WorkflowExecutor;

/// Runs sub-actions and streams their progress.
#[derive(Clone)]
pub struct SubActionHandler {
    db: Database,
    registry: Arc<ModuleRegistry>,
    executor: WorkflowExecutor,
    config: EngineConfig,
}

impl SubActionHandler {
    pub fn new(
        db: Database,
        registry: Arc<ModuleRegistry>,
        executor: WorkflowExecutor,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            registry,
            executor,
            config,
        }
    }

    /// Executes a sub-action, streaming progress and a terminal
    /// complete/error event. Returns the receiving end of the stream.
    pub fn execute_sub_action(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
        sub_action_id: &str,
        params: Map<String, Value>,
        workflow_def: ResolvedWorkflow,
        services: ExecutionServices,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SseEvent> {
        let (tx, rx) = mpsc::channel(64);
        let handler = self.clone();
        let workflow_run_id = workflow_run_id.to_string();
        let interaction_id = interaction_id.to_string();
        let sub_action_id = sub_action_id.to_string();

        tokio::spawn(async move {
            handler
                .run(
                    &workflow_run_id,
                    &interaction_id,
                    &sub_action_id,
                    params,
                    workflow_def,
                    services,
                    cancel,
                    tx,
                )
                .await;
        });
        rx
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(name = "sub_action_run", skip_all, fields(run = %workflow_run_id, sub_action = %sub_action_id))]
    async fn run(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
        sub_action_id: &str,
        params: Map<String, Value>,
        workflow_def: ResolvedWorkflow,
        services: ExecutionServices,
        cancel: CancellationToken,
        tx: mpsc::Sender<SseEvent>,
    ) {
        let execution_id = ids::execution_id(sub_action_id);

        let interaction = match self
            .db
            .events
            .find_interaction_request(workflow_run_id, interaction_id)
            .await
        {
            Ok(Some(event)) => event,
            Ok(None) => {
                let _ = tx
                    .send(SseEvent::error(
                        workflow_run_id,
                        &format!("Interaction {} not found", interaction_id),
                    ))
                    .await;
                return;
            }
            Err(e) => {
                let _ = tx
                    .send(SseEvent::error(
                        workflow_run_id,
                        &sanitize_error_message(&e.to_string()),
                    ))
                    .await;
                return;
            }
        };

        let step_id = interaction.step_id.clone();
        let module_name = interaction.module_name.clone();

        let module_config = step_id
            .as_deref()
            .zip(module_name.as_deref())
            .and_then(|(step, module)| workflow_def.module_config(step, module))
            .cloned()
            .unwrap_or_default();

        let Some(sub_action_def) = module_config
            .sub_actions
            .iter()
            .find(|s| s.id == sub_action_id)
            .cloned()
        else {
            let _ = tx
                .send(SseEvent::error(
                    workflow_run_id,
                    &format!("Sub-action '{}' not found in module config", sub_action_id),
                ))
                .await;
            return;
        };

        if let Err(e) = self
            .db
            .events
            .store_event(
                workflow_run_id,
                EventType::SubActionStarted,
                EventWrite {
                    step_id: step_id.clone(),
                    module_name: module_name.clone(),
                    data: Some(json!({
                        "execution_id": execution_id,
                        "sub_action_id": sub_action_id,
                        "interaction_id": interaction_id,
                        "params": params,
                    })),
                    ..Default::default()
                },
            )
            .await
        {
            let _ = tx
                .send(SseEvent::error(
                    workflow_run_id,
                    &sanitize_error_message(&e.to_string()),
                ))
                .await;
            return;
        }

        let loading_label = sub_action_def
            .loading_label
            .clone()
            .unwrap_or_else(|| "Processing...".to_string());
        let _ = tx
            .send(SseEvent::new(
                crate::models::SseEventType::Progress,
                json!({
                    "workflow_run_id": workflow_run_id,
                    "execution_id": execution_id,
                    "message": loading_label,
                }),
            ))
            .await;

        let Some(first_action) = sub_action_def.actions.first().cloned() else {
            let _ = tx
                .send(SseEvent::error(
                    workflow_run_id,
                    &format!("Sub-action '{}' has no actions", sub_action_id),
                ))
                .await;
            return;
        };

        let dispatch = match first_action.action_type {
            SubActionType::TargetSubAction => {
                self.execute_target_sub_actions(
                    workflow_run_id,
                    &execution_id,
                    &sub_action_def,
                    &params,
                    &workflow_def,
                    &services,
                    cancel.clone(),
                    &tx,
                )
                .await
            }
            SubActionType::SelfSubAction => self
                .execute_self_sub_action(
                    workflow_run_id,
                    &execution_id,
                    &interaction,
                    &first_action,
                    &params,
                    &services,
                    cancel.clone(),
                    &tx,
                )
                .await
                .map(|state| (state, None)),
        };

        let (child_state, child_workflow_id) = match dispatch {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Sub-action execution failed");
                let _ = tx
                    .send(SseEvent::new(
                        crate::models::SseEventType::Error,
                        json!({
                            "workflow_run_id": workflow_run_id,
                            "message": sanitize_error_message(&e.to_string()),
                            "execution_id": execution_id,
                        }),
                    ))
                    .await;
                return;
            }
        };

        // Parent state is needed for merge-mode mappings
        let parent_outputs = match self
            .db
            .state
            .get_module_outputs(workflow_run_id, None)
            .await
        {
            Ok(outputs) => outputs,
            Err(e) => {
                let _ = tx
                    .send(SseEvent::error(
                        workflow_run_id,
                        &sanitize_error_message(&e.to_string()),
                    ))
                    .await;
                return;
            }
        };

        let out_state = apply_result_mapping(&sub_action_def, &child_state, &parent_outputs);

        let mut completed_data = json!({
            "execution_id": execution_id,
            "sub_action_id": sub_action_id,
            "child_state": child_state,
            "_state_mapped": out_state,
        });
        if let Some(child_id) = &child_workflow_id {
            completed_data["child_workflow_id"] = json!(child_id);
        }

        if let Err(e) = self
            .db
            .events
            .store_event(
                workflow_run_id,
                EventType::SubActionCompleted,
                EventWrite {
                    step_id,
                    module_name,
                    data: Some(completed_data),
                    ..Default::default()
                },
            )
            .await
        {
            let _ = tx
                .send(SseEvent::error(
                    workflow_run_id,
                    &sanitize_error_message(&e.to_string()),
                ))
                .await;
            return;
        }

        info!(execution = %execution_id, "Sub-action completed");
        let _ = tx
            .send(SseEvent::new(
                crate::models::SseEventType::Complete,
                json!({
                    "execution_id": execution_id,
                    "updated_state": out_state,
                    "sub_action_result": child_state,
                }),
            ))
            .await;
    }

    /// Runs referenced modules as one synthetic step in a hidden child run
    /// seeded with the parent's current state.
    #[allow(clippy::too_many_arguments)]
    async fn execute_target_sub_actions(
        &self,
        parent_workflow_run_id: &str,
        execution_id: &str,
        sub_action_def: &SubActionDef,
        params: &Map<String, Value>,
        workflow_def: &ResolvedWorkflow,
        services: &ExecutionServices,
        cancel: CancellationToken,
        tx: &mpsc::Sender<SseEvent>,
    ) -> anyhow::Result<(Map<String, Value>, Option<String>)> {
        let mut parent_outputs = self
            .db
            .state
            .get_module_outputs(parent_workflow_run_id, None)
            .await?;

        // Route caller feedback into the configured state key so nested
        // LLM modules see the note
        if let Some(feedback) = params.get("feedback").and_then(Value::as_str) {
            let feedback_key = sub_action_def
                .feedback
                .as_ref()
                .map(|f| f.state_key.clone())
                .unwrap_or_else(|| crate::modules::RETRY_FEEDBACK_KEY.to_string());
            parent_outputs.insert(feedback_key, json!(feedback));
        }

        let mut resolved_modules = Vec::new();
        for action in &sub_action_def.actions {
            let module_config = resolve_action_to_module(action, workflow_def)?;
            info!(
                module_id = %module_config.module_id,
                name = ?module_config.name,
                "Resolved sub-action module"
            );
            resolved_modules.push(module_config);
        }

        // Interactive modules cannot nest inside a pending interaction
        for module_config in &resolved_modules {
            if let Some(RegisteredModule::Interactive(_)) = self.registry.get(&module_config.module_id)
            {
                anyhow::bail!(
                    "Sub-action cannot contain interactive module: {}",
                    module_config.module_id
                );
            }
        }

        let virtual_step = StepDef {
            step_id: format!("sub_action_{}", execution_id),
            name: None,
            modules: resolved_modules,
        };

        let child_id = self
            .db
            .runs
            .create_child_workflow_run(parent_workflow_run_id, execution_id)
            .await?;

        // Drive the synthetic step on its own task so the stream keeps
        // ticking progress while it runs
        let executor = self.executor.clone();
        let child_for_task = child_id.clone();
        let workflow_for_task = workflow_def.clone();
        let services_for_task = services.clone();
        let cancel_for_task = cancel.clone();
        let mut handle = tokio::spawn(async move {
            let mut state = parent_outputs;
            executor
                .execute_step_modules(
                    &child_for_task,
                    &virtual_step,
                    0,
                    &mut state,
                    &services_for_task,
                    &workflow_for_task,
                    cancel_for_task,
                )
                .await
        });

        let start = Instant::now();
        let mut progress_ticker = tokio::time::interval(self.config.progress_interval);
        progress_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let response = loop {
            tokio::select! {
                result = &mut handle => break result??,
                _ = progress_ticker.tick() => {
                    let _ = tx.send(SseEvent::new(
                        crate::models::SseEventType::Progress,
                        json!({
                            "workflow_run_id": parent_workflow_run_id,
                            "execution_id": execution_id,
                            "elapsed_ms": start.elapsed().as_millis() as u64,
                            "message": "Processing...",
                        }),
                    )).await;
                }
            }
        };

        if response.status == RunStatus::Error {
            anyhow::bail!(
                "Sub-action failed: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            );
        }

        info!(child = %child_id, "Sub-action child run completed");
        let child_state = self.db.state.get_module_outputs(&child_id, None).await?;
        Ok((child_state, Some(child_id)))
    }

    /// Delegates to the module's own sub-action driver, forwarding its
    /// progress payloads into the stream.
    #[allow(clippy::too_many_arguments)]
    async fn execute_self_sub_action(
        &self,
        workflow_run_id: &str,
        execution_id: &str,
        interaction: &WorkflowEvent,
        action: &SubActionAction,
        params: &Map<String, Value>,
        services: &ExecutionServices,
        cancel: CancellationToken,
        tx: &mpsc::Sender<SseEvent>,
    ) -> anyhow::Result<Map<String, Value>> {
        let module_id = interaction
            .data
            .get("module_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Interaction has no module_id"))?;

        let Some(RegisteredModule::Interactive(module)) = self.registry.get(module_id) else {
            anyhow::bail!("Module '{}' does not support sub-actions", module_id);
        };
        let module = module.clone();

        let merged_params = deep_merge(&action.params, params);

        let ctx = SubActionContext {
            workflow_run_id: workflow_run_id.to_string(),
            execution_id: execution_id.to_string(),
            interaction_id: interaction
                .interaction_id()
                .unwrap_or_default()
                .to_string(),
            db: self.db.clone(),
            services: services.clone(),
            params: merged_params,
            cancel,
        };

        let (progress_tx, mut progress_rx) = mpsc::channel::<Value>(32);
        let mut task = tokio::spawn(async move { module.run_sub_action(ctx, progress_tx).await });

        loop {
            tokio::select! {
                result = &mut task => return result?,
                progress = progress_rx.recv() => {
                    if let Some(data) = progress {
                        let mut payload = json!({
                            "workflow_run_id": workflow_run_id,
                            "execution_id": execution_id,
                        });
                        if let (Value::Object(target), Value::Object(source)) = (&mut payload, &data) {
                            for (key, value) in source {
                                target.insert(key.clone(), value.clone());
                            }
                        }
                        let _ = tx.send(SseEvent::new(crate::models::SseEventType::Progress, payload)).await;
                    }
                }
            }
        }
    }
}

/// Resolves an action to a full module config: ref'd config, inline fields,
/// then overrides, deep-merged last-wins.
fn resolve_action_to_module(
    action: &SubActionAction,
    workflow_def: &ResolvedWorkflow,
) -> anyhow::Result<ModuleDef> {
    let mut config: Map<String, Value> = match &action.r#ref {
        Some(module_ref) => {
            let module = workflow_def
                .module_config(&module_ref.step_id, &module_ref.module_name)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Module ref not found: step={}, module={}",
                        module_ref.step_id,
                        module_ref.module_name
                    )
                })?;
            serde_json::to_value(module)?
                .as_object()
                .cloned()
                .unwrap_or_default()
        }
        None => Map::new(),
    };

    if let Some(module_id) = &action.module_id {
        config.insert("module_id".to_string(), json!(module_id));
    }
    if let Some(name) = &action.name {
        config.insert("name".to_string(), json!(name));
    }
    for (key, incoming) in [("inputs", &action.inputs), ("outputs_to_state", &action.outputs_to_state)] {
        if incoming.is_empty() {
            continue;
        }
        let merged = match config.get(key).and_then(Value::as_object) {
            Some(existing) => deep_merge(existing, incoming),
            None => incoming.clone(),
        };
        config.insert(key.to_string(), Value::Object(merged));
    }
    for (key, value) in &action.overrides {
        match (config.get(key).and_then(Value::as_object), value.as_object()) {
            (Some(existing), Some(incoming)) => {
                config.insert(key.clone(), Value::Object(deep_merge(existing, incoming)));
            }
            _ => {
                config.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(serde_json::from_value(Value::Object(config))?)
}

/// Applies the result mapping: replace sets the child value at the target
/// path; merge concatenates parent-then-child arrays.
fn apply_result_mapping(
    sub_action_def: &SubActionDef,
    child_state: &Map<String, Value>,
    parent_outputs: &Map<String, Value>,
) -> Map<String, Value> {
    use crate::models::MappingMode;

    let child_value = Value::Object(child_state.clone());
    let parent_value = Value::Object(parent_outputs.clone());
    let mut out_state = Map::new();

    for mapping in &sub_action_def.result_mapping {
        let source_value = get_nested_value(&child_value, &mapping.source).cloned();
        if source_value.is_none() {
            warn!(
                source = %mapping.source,
                "Result mapping source missing from child state"
            );
        }

        match mapping.mode {
            MappingMode::Replace => {
                set_nested_value(
                    &mut out_state,
                    &mapping.target,
                    source_value.unwrap_or(Value::Null),
                );
            }
            MappingMode::Merge => {
                let existing = get_nested_value(&parent_value, &mapping.target)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let incoming = source_value
                    .as_ref()
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let merged: Vec<Value> = existing.into_iter().chain(incoming).collect();
                set_nested_value(&mut out_state, &mapping.target, Value::Array(merged));
            }
        }
    }

    out_state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping_def(mappings: Value) -> SubActionDef {
        serde_json::from_value(json!({
            "id": "more",
            "actions": [],
            "result_mapping": mappings
        }))
        .unwrap()
    }

    #[test]
    fn test_replace_mapping_sets_nested_target() {
        let def = mapping_def(json!([
            {"source": "scene.concepts", "target": "draft.concepts", "mode": "replace"}
        ]));
        let child = json!({"scene": {"concepts": [1, 2]}})
            .as_object()
            .unwrap()
            .clone();
        let parent = Map::new();

        let out = apply_result_mapping(&def, &child, &parent);
        assert_eq!(out["draft"]["concepts"], json!([1, 2]));
    }

    #[test]
    fn test_merge_mapping_concatenates_parent_first() {
        let def = mapping_def(json!([
            {"source": "items", "target": "items", "mode": "merge"}
        ]));
        let child = json!({"items": [3, 4]}).as_object().unwrap().clone();
        let parent = json!({"items": [1, 2]}).as_object().unwrap().clone();

        let out = apply_result_mapping(&def, &child, &parent);
        assert_eq!(out["items"], json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_merge_with_missing_parent_is_child_only() {
        let def = mapping_def(json!([
            {"source": "items", "target": "items", "mode": "merge"}
        ]));
        let child = json!({"items": [3]}).as_object().unwrap().clone();
        let parent = Map::new();

        let out = apply_result_mapping(&def, &child, &parent);
        assert_eq!(out["items"], json!([3]));
    }

    #[test]
    fn test_resolve_action_inline_overrides_ref() {
        let workflow_def: ResolvedWorkflow = serde_json::from_value(json!({
            "workflow_id": "demo",
            "steps": [{
                "step_id": "step1",
                "modules": [{
                    "module_id": "api.llm_call",
                    "name": "moduleGen",
                    "inputs": {"prompt": "old", "temperature": 0.2}
                }]
            }]
        }))
        .unwrap();

        let action: SubActionAction = serde_json::from_value(json!({
            "type": "target_sub_action",
            "ref": {"step_id": "step1", "module_name": "moduleGen"},
            "inputs": {"prompt": "new"},
            "overrides": {"outputs_to_state": {"response": "extra"}}
        }))
        .unwrap();

        let resolved = resolve_action_to_module(&action, &workflow_def).unwrap();
        assert_eq!(resolved.module_id, "api.llm_call");
        assert_eq!(resolved.inputs["prompt"], "new");
        assert_eq!(resolved.inputs["temperature"], 0.2);
        assert_eq!(resolved.outputs_to_state["response"], "extra");
    }

    #[test]
    fn test_resolve_action_missing_ref_errors() {
        let workflow_def = ResolvedWorkflow::default();
        let action: SubActionAction = serde_json::from_value(json!({
            "type": "target_sub_action",
            "ref": {"step_id": "nope", "module_name": "missing"}
        }))
        .unwrap();
        assert!(resolve_action_to_module(&action, &workflow_def).is_err());
    }
}
