// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stateless workflow processor.
//!
//! Main orchestrator behind every client-facing call: each method loads its
//! context from the store, drives execution until the next interaction or
//! completion, and persists every effect as events before returning.
//! Delegates to the executor, interaction handler, navigator and sub-action
//! runner.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::db::{Database, EventWrite};
use crate::diff::diff_workflows;
use crate::engine::{ExecutionServices, ModuleRegistry};
use crate::llm::LlmClient;
use crate::models::{
    CompletedInteraction, EventType, InteractionResponseData, ResolvedWorkflow, SourceType,
    SseEvent, StartResult, WorkflowEvent, WorkflowPosition, WorkflowProgress, WorkflowResponse,
    WorkflowRun,
};
use crate::workflow::executor::WorkflowExecutor;
use crate::workflow::interaction::InteractionHandler;
use crate::workflow::navigation::NavigationHandler;
use crate::workflow::sub_action::SubActionHandler;

/// Options for starting (or resuming) a run from a stored version.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub project_name: String,
    pub workflow_template_name: String,
    pub user_id: String,
    pub ai_config: Option<Value>,
    pub force_new: bool,
    pub capabilities: Vec<String>,
}

/// Stateless workflow processor.
#[derive(Clone)]
pub struct WorkflowProcessor {
    pub db: Database,
    pub registry: Arc<ModuleRegistry>,
    pub executor: WorkflowExecutor,
    pub navigator: NavigationHandler,
    pub interaction_handler: InteractionHandler,
    pub sub_action_handler: SubActionHandler,
    pub config: EngineConfig,
    llm: Option<Arc<dyn LlmClient>>,
    http: Option<reqwest::Client>,
}

impl WorkflowProcessor {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self::with_registry(db, config, Arc::new(ModuleRegistry::with_builtins()))
    }

    pub fn with_registry(db: Database, config: EngineConfig, registry: Arc<ModuleRegistry>) -> Self {
        let executor = WorkflowExecutor::new(db.clone(), registry.clone());
        let navigator = NavigationHandler::new(db.clone(), executor.clone());
        let interaction_handler = InteractionHandler::new(
            db.clone(),
            registry.clone(),
            executor.clone(),
            navigator.clone(),
        );
        let sub_action_handler = SubActionHandler::new(
            db.clone(),
            registry.clone(),
            executor.clone(),
            config.clone(),
        );
        Self {
            db,
            registry,
            executor,
            navigator,
            interaction_handler,
            sub_action_handler,
            config,
            llm: None,
            http: None,
        }
    }

    /// Injects the LLM client used by `api.llm_call`.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Injects the HTTP client used by `api.fetch`.
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    // ------------------------------------------------------------------
    // Start / resume
    // ------------------------------------------------------------------

    /// Starts or resumes a run from an already-stored source version.
    #[instrument(name = "start_workflow", skip(self, options), fields(user = %options.user_id, project = %options.project_name))]
    pub async fn start_workflow(
        &self,
        version_id: &str,
        options: StartOptions,
    ) -> anyhow::Result<WorkflowResponse> {
        let Some(source_version) = self.db.versions.get_workflow_version_by_id(version_id).await?
        else {
            return Ok(WorkflowResponse::error(
                "",
                format!("Version {} not found", version_id),
            ));
        };
        let workflow_template_id = source_version.workflow_template_id.clone();

        let best_version = self
            .db
            .versions
            .get_version_for_capabilities(version_id, &options.capabilities)
            .await?;
        let mut active_version_id = best_version.workflow_version_id.clone();
        let mut workflow_def = best_version.resolved_workflow;

        let (workflow_run_id, is_new, branch_id) = self
            .db
            .runs
            .get_or_create_workflow_run(
                &options.project_name,
                &options.user_id,
                &options.workflow_template_name,
                &workflow_template_id,
                &active_version_id,
            )
            .await?;

        let mut version_changed = false;

        if is_new {
            self.db
                .events
                .store_event(
                    &workflow_run_id,
                    EventType::WorkflowCreated,
                    EventWrite {
                        data: Some(json!({
                            "project_name": options.project_name,
                            "workflow_template_name": options.workflow_template_name,
                            "workflow_template_id": workflow_template_id,
                            "version_id": active_version_id,
                        })),
                        branch_id: Some(branch_id),
                        workflow_version_id: Some(active_version_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            self.db
                .runs
                .add_version_history_entry(
                    &workflow_run_id,
                    &active_version_id,
                    options.capabilities.clone(),
                )
                .await?;
        } else if options.force_new {
            self.db.events.delete_workflow_events(&workflow_run_id).await?;
            let new_branch = self.db.runs.reset_workflow(&workflow_run_id).await?;
            self.db
                .runs
                .set_current_version(&workflow_run_id, &active_version_id)
                .await?;
            self.db
                .events
                .store_event(
                    &workflow_run_id,
                    EventType::WorkflowCreated,
                    EventWrite {
                        data: Some(json!({
                            "project_name": options.project_name,
                            "workflow_template_name": options.workflow_template_name,
                            "workflow_template_id": workflow_template_id,
                            "version_id": active_version_id,
                            "reset": true,
                        })),
                        branch_id: Some(new_branch),
                        workflow_version_id: Some(active_version_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            self.db
                .runs
                .add_version_history_entry(
                    &workflow_run_id,
                    &active_version_id,
                    options.capabilities.clone(),
                )
                .await?;
        } else {
            // Resuming: keep executing the run's current version
            let workflow = self
                .db
                .runs
                .get_workflow(&workflow_run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Run {} disappeared", workflow_run_id))?;
            let Some(current_version_id) = workflow.current_workflow_version_id else {
                return Ok(WorkflowResponse::error(
                    &workflow_run_id,
                    "Workflow run has no current version",
                ));
            };
            let Some(current_version) = self
                .db
                .versions
                .get_workflow_version_by_id(&current_version_id)
                .await?
            else {
                return Ok(WorkflowResponse::error(
                    &workflow_run_id,
                    format!("Current version {} has no workflow definition", current_version_id),
                ));
            };
            let current_source_id = current_version
                .parent_workflow_version_id
                .clone()
                .unwrap_or_else(|| current_version_id.clone());
            version_changed = current_source_id != version_id;

            workflow_def = current_version.resolved_workflow;
            active_version_id = current_version_id;
            debug!(version = %active_version_id, "Resuming with existing version");
        }

        if let Some(ai_config) = &options.ai_config {
            self.db.runs.set_ai_config(&workflow_run_id, ai_config).await?;
        }

        let workflow = self
            .db
            .runs
            .get_workflow(&workflow_run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Run {} disappeared", workflow_run_id))?;
        let services = self.build_services(&workflow, options.ai_config.as_ref());

        let position = self
            .db
            .state
            .get_workflow_position(&workflow_run_id, None)
            .await?;

        debug!(
            current_step = ?position.current_step,
            completed = position.completed_steps.len(),
            pending = position.pending_interaction.is_some(),
            version_changed,
            "Derived position"
        );

        if let Some(pending) = &position.pending_interaction {
            if !version_changed {
                return Ok(WorkflowResponse::awaiting_input(
                    &workflow_run_id,
                    "Pending interaction",
                    pending.clone(),
                    build_progress(&workflow_def, &position),
                ));
            }
            debug!("Version changed with pending interaction, re-executing");
        }

        self.executor
            .execute_from_position(
                &workflow_run_id,
                &workflow_def,
                &position,
                &services,
                CancellationToken::new(),
            )
            .await
    }

    /// Starts from raw workflow content: stores the version (deduplicated)
    /// and runs. When the template already holds a different source version
    /// and `confirmed` is false, returns the diff for the caller to
    /// confirm instead of writing anything.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_from_content(
        &self,
        workflow_content: &Value,
        options: StartOptions,
        source_type: SourceType,
        variants: &[crate::models::ExpandedVariant],
        confirmed: bool,
    ) -> anyhow::Result<StartResult> {
        let resolved: ResolvedWorkflow = serde_json::from_value(workflow_content.clone())?;
        let content_hash = crate::db::VersionRepository::content_hash(workflow_content);

        if !confirmed {
            if let Some(existing) = self
                .db
                .versions
                .get_latest_source_version(&options.workflow_template_name, &options.user_id)
                .await?
            {
                if existing.content_hash != content_hash {
                    let old = serde_json::to_value(&existing.resolved_workflow)?;
                    let version_diff = diff_workflows(&old, workflow_content);
                    if version_diff.has_changes {
                        info!(
                            summary = %version_diff.summary,
                            "Submitted content differs from stored version"
                        );
                        return Ok(StartResult::RequiresConfirmation {
                            requires_confirmation: true,
                            version_diff,
                            old_hash: existing.content_hash,
                            new_hash: content_hash,
                        });
                    }
                }
            }
        }

        let (version_id, _, _) = self
            .db
            .versions
            .process_and_store_workflow_versions(
                &resolved,
                &content_hash,
                source_type,
                &options.workflow_template_name,
                &options.user_id,
                variants,
            )
            .await?;

        let response = self.start_workflow(&version_id, options).await?;
        Ok(StartResult::Response(response))
    }

    /// Adopts a global template for a user: creates the hidden per-user
    /// shadow template and promotes the global version tree into it.
    /// Returns the hidden template's latest source version id.
    pub async fn adopt_global_template(
        &self,
        global_template_id: &str,
        user_id: &str,
    ) -> anyhow::Result<(String, Option<String>)> {
        let (hidden_template_id, _, hidden_name) = self
            .db
            .versions
            .get_or_create_hidden_template(global_template_id, user_id)
            .await?;

        let counts = self
            .db
            .versions
            .sync_template_versions(global_template_id, &hidden_template_id)
            .await?;
        info!(
            inserted = counts.inserted,
            existing = counts.existing,
            template = %hidden_name,
            "Synced global template into hidden shadow"
        );

        let latest = self
            .db
            .versions
            .get_source_versions_for_template(&hidden_template_id, 1)
            .await?
            .pop()
            .map(|v| v.workflow_version_id);
        Ok((hidden_template_id, latest))
    }

    /// Resumes a run in place. Recovery runs first: a cached status that
    /// contradicts the derived position forks a repair branch before any
    /// execution.
    #[instrument(name = "resume_workflow", skip(self, ai_config), fields(run = %workflow_run_id))]
    pub async fn resume_workflow(
        &self,
        workflow_run_id: &str,
        ai_config: Option<&Value>,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        if let Some(recovery) = self.db.recover_workflow(workflow_run_id).await? {
            info!(reason = %recovery.reason, "Applied recovery before resume");
        }

        let workflow = match self.db.runs.get_workflow(workflow_run_id).await? {
            Some(workflow) => workflow,
            None => {
                return Ok(WorkflowResponse::error(workflow_run_id, "Workflow not found"));
            }
        };

        let workflow_def = match self.get_workflow_def(&workflow).await? {
            Some(def) => def,
            None => {
                return Ok(WorkflowResponse::error(
                    workflow_run_id,
                    "Workflow definition not found",
                ));
            }
        };

        if let Some(ai_config) = ai_config {
            self.db.runs.set_ai_config(workflow_run_id, ai_config).await?;
        }

        let position = self
            .db
            .state
            .get_workflow_position(workflow_run_id, None)
            .await?;

        if let Some(pending) = &position.pending_interaction {
            return Ok(WorkflowResponse::awaiting_input(
                workflow_run_id,
                "Pending interaction",
                pending.clone(),
                build_progress(&workflow_def, &position),
            ));
        }

        let services = self.build_services(&workflow, ai_config);
        self.executor
            .execute_from_position(workflow_run_id, &workflow_def, &position, &services, cancel)
            .await
    }

    /// Resumes with new workflow content. A differing hash returns the diff
    /// for confirmation; `confirmed` writes the new version, points the run
    /// at the best capability match, records history, and resumes.
    #[allow(clippy::too_many_arguments)]
    pub async fn resume_with_content(
        &self,
        workflow_run_id: &str,
        workflow_content: &Value,
        user_id: &str,
        ai_config: Option<&Value>,
        capabilities: &[String],
        variants: &[crate::models::ExpandedVariant],
        confirmed: bool,
    ) -> anyhow::Result<StartResult> {
        let workflow = match self.db.runs.get_workflow(workflow_run_id).await? {
            Some(workflow) => workflow,
            None => {
                return Ok(StartResult::Response(WorkflowResponse::error(
                    workflow_run_id,
                    "Workflow not found",
                )));
            }
        };
        if workflow.user_id != user_id {
            return Ok(StartResult::Response(WorkflowResponse::error(
                workflow_run_id,
                "Access denied",
            )));
        }

        let content_hash = crate::db::VersionRepository::content_hash(workflow_content);
        let current_source = match &workflow.current_workflow_version_id {
            Some(current_id) => {
                let current = self.db.versions.get_workflow_version_by_id(current_id).await?;
                match current {
                    Some(version) => {
                        let source_id = version
                            .parent_workflow_version_id
                            .clone()
                            .unwrap_or_else(|| version.workflow_version_id.clone());
                        self.db.versions.get_workflow_version_by_id(&source_id).await?
                    }
                    None => None,
                }
            }
            None => None,
        };

        if let Some(current_source) = &current_source {
            if current_source.content_hash != content_hash && !confirmed {
                let old = serde_json::to_value(&current_source.resolved_workflow)?;
                let version_diff = diff_workflows(&old, workflow_content);
                if version_diff.has_changes {
                    return Ok(StartResult::RequiresConfirmation {
                        requires_confirmation: true,
                        version_diff,
                        old_hash: current_source.content_hash.clone(),
                        new_hash: content_hash,
                    });
                }
            }
        }

        let resolved: ResolvedWorkflow = serde_json::from_value(workflow_content.clone())?;
        let (source_version_id, _, _) = self
            .db
            .versions
            .process_and_store_workflow_versions(
                &resolved,
                &content_hash,
                SourceType::Json,
                &workflow.workflow_template_name,
                user_id,
                variants,
            )
            .await?;

        let best = self
            .db
            .versions
            .get_version_for_capabilities(&source_version_id, capabilities)
            .await?;

        self.db
            .runs
            .set_current_version(workflow_run_id, &best.workflow_version_id)
            .await?;
        self.db
            .runs
            .add_version_history_entry(workflow_run_id, &best.workflow_version_id, capabilities.to_vec())
            .await?;

        let response = self
            .resume_workflow(workflow_run_id, ai_config, CancellationToken::new())
            .await?;
        Ok(StartResult::Response(response))
    }

    // ------------------------------------------------------------------
    // Respond / navigate
    // ------------------------------------------------------------------

    /// Processes a client response to a pending interaction.
    #[instrument(name = "respond", skip(self, response, ai_config, cancel), fields(run = %workflow_run_id, interaction = %interaction_id))]
    pub async fn respond(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
        response: &InteractionResponseData,
        ai_config: Option<&Value>,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkflowResponse> {
        let workflow = match self.db.runs.get_workflow(workflow_run_id).await? {
            Some(workflow) => workflow,
            None => {
                return Ok(WorkflowResponse::error(workflow_run_id, "Workflow not found"));
            }
        };

        let interaction_request = self
            .db
            .events
            .find_interaction_request(workflow_run_id, interaction_id)
            .await?;
        let step_id = interaction_request.as_ref().and_then(|e| e.step_id.clone());
        let module_name = interaction_request
            .as_ref()
            .and_then(|e| e.module_name.clone());
        let module_id = interaction_request
            .as_ref()
            .and_then(|e| e.data.get("module_id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut response_data = json!({
            "interaction_id": interaction_id,
            "response": response,
        });
        if let Some(module_id) = &module_id {
            response_data["module_id"] = json!(module_id);
        }
        self.db
            .events
            .store_event(
                workflow_run_id,
                EventType::InteractionResponse,
                EventWrite {
                    step_id,
                    module_name,
                    data: Some(response_data),
                    ..Default::default()
                },
            )
            .await?;

        let workflow_def = match self.get_workflow_def(&workflow).await? {
            Some(def) => def,
            None => {
                return Ok(WorkflowResponse::error(
                    workflow_run_id,
                    "Workflow definition not found",
                ));
            }
        };
        let services = self.build_services(&workflow, ai_config);

        if self.navigator.is_retry_response(response) {
            return self
                .navigator
                .handle_retry_from_response(workflow_run_id, &workflow_def, response, &services, cancel)
                .await;
        }

        self.interaction_handler
            .continue_after_interaction(workflow_run_id, &workflow_def, &services, response, cancel)
            .await
    }

    /// Explicit retry of a module with optional feedback.
    pub async fn retry(
        &self,
        workflow_run_id: &str,
        target_module: &str,
        feedback: Option<&str>,
        ai_config: Option<&Value>,
    ) -> anyhow::Result<WorkflowResponse> {
        let workflow = match self.db.runs.get_workflow(workflow_run_id).await? {
            Some(workflow) => workflow,
            None => {
                return Ok(WorkflowResponse::error(workflow_run_id, "Workflow not found"));
            }
        };
        let workflow_def = match self.get_workflow_def(&workflow).await? {
            Some(def) => def,
            None => {
                return Ok(WorkflowResponse::error(
                    workflow_run_id,
                    "Workflow definition not found",
                ));
            }
        };
        let services = self.build_services(&workflow, ai_config);
        self.navigator
            .retry(
                workflow_run_id,
                &workflow_def,
                target_module,
                feedback,
                &services,
                CancellationToken::new(),
            )
            .await
    }

    /// Explicit jump to a step/module.
    pub async fn jump(
        &self,
        workflow_run_id: &str,
        target_step: &str,
        target_module: &str,
    ) -> anyhow::Result<WorkflowResponse> {
        let workflow = match self.db.runs.get_workflow(workflow_run_id).await? {
            Some(workflow) => workflow,
            None => {
                return Ok(WorkflowResponse::error(workflow_run_id, "Workflow not found"));
            }
        };
        let workflow_def = match self.get_workflow_def(&workflow).await? {
            Some(def) => def,
            None => {
                return Ok(WorkflowResponse::error(
                    workflow_run_id,
                    "Workflow definition not found",
                ));
            }
        };
        let services = self.build_services(&workflow, None);
        self.navigator
            .jump(
                workflow_run_id,
                &workflow_def,
                target_step,
                target_module,
                &services,
                CancellationToken::new(),
            )
            .await
    }

    /// Runs a sub-action inside a pending interaction, streaming progress.
    pub async fn execute_sub_action(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
        sub_action_id: &str,
        params: Map<String, Value>,
        ai_config: Option<&Value>,
        cancel: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<SseEvent>> {
        let workflow = self
            .db
            .runs
            .get_workflow(workflow_run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow {} not found", workflow_run_id))?;
        let workflow_def = self
            .get_workflow_def(&workflow)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow definition not found"))?;
        let services = self.build_services(&workflow, ai_config);

        Ok(self.sub_action_handler.execute_sub_action(
            workflow_run_id,
            interaction_id,
            sub_action_id,
            params,
            workflow_def,
            services,
            cancel,
        ))
    }

    // ------------------------------------------------------------------
    // Queries / lifecycle
    // ------------------------------------------------------------------

    /// Existence check for a (user, template, project) triple.
    pub async fn check_workflow(
        &self,
        project_name: &str,
        workflow_template_name: &str,
        user_id: &str,
    ) -> anyhow::Result<Value> {
        match self
            .db
            .runs
            .find_existing_workflow(user_id, workflow_template_name, project_name)
            .await?
        {
            Some(run) => Ok(json!({
                "exists": true,
                "workflow_run_id": run.workflow_run_id,
                "status": run.status,
                "current_step": run.current_step,
                "current_module": run.current_module,
            })),
            None => Ok(json!({"exists": false})),
        }
    }

    pub async fn get_status(&self, workflow_run_id: &str) -> anyhow::Result<Option<Value>> {
        let Some(run) = self.db.runs.get_workflow(workflow_run_id).await? else {
            return Ok(None);
        };
        let position = self
            .db
            .state
            .get_workflow_position(workflow_run_id, None)
            .await?;
        Ok(Some(json!({
            "workflow_run_id": run.workflow_run_id,
            "status": run.status,
            "current_step": run.current_step,
            "current_step_name": run.current_step_name,
            "current_module": run.current_module,
            "completed_steps": position.completed_steps,
            "pending_interaction": position.pending_interaction.is_some(),
            "created_at": run.created_at,
            "updated_at": run.updated_at,
            "completed_at": run.completed_at,
        })))
    }

    pub async fn get_events(
        &self,
        workflow_run_id: &str,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<WorkflowEvent>> {
        self.db.events.get_events(workflow_run_id, limit).await
    }

    pub async fn get_interaction_history(
        &self,
        workflow_run_id: &str,
    ) -> anyhow::Result<Vec<CompletedInteraction>> {
        self.db
            .state
            .get_interaction_history(workflow_run_id, None)
            .await
    }

    /// Flat derived state map.
    pub async fn get_state(&self, workflow_run_id: &str) -> anyhow::Result<Map<String, Value>> {
        self.db.state.get_module_outputs(workflow_run_id, None).await
    }

    /// Hierarchical state view (steps → modules → events plus the flat map).
    pub async fn get_state_v2(&self, workflow_run_id: &str) -> anyhow::Result<Map<String, Value>> {
        self.db
            .state
            .get_full_workflow_state(workflow_run_id, None)
            .await
    }

    /// Deletes a run and its entire history.
    pub async fn delete_workflow(&self, workflow_run_id: &str) -> anyhow::Result<()> {
        self.db.purge_workflow(workflow_run_id).await
    }

    /// Resets a run in place: purges events, fresh root branch, status
    /// back to created.
    pub async fn reset_workflow(&self, workflow_run_id: &str) -> anyhow::Result<()> {
        self.db.events.delete_workflow_events(workflow_run_id).await?;
        self.db.runs.reset_workflow(workflow_run_id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) async fn get_workflow_def(
        &self,
        workflow: &WorkflowRun,
    ) -> anyhow::Result<Option<ResolvedWorkflow>> {
        match &workflow.current_workflow_version_id {
            Some(version_id) => self.db.versions.get_resolved_workflow(version_id).await,
            None => Ok(None),
        }
    }

    pub(crate) fn build_services(
        &self,
        workflow: &WorkflowRun,
        ai_config: Option<&Value>,
    ) -> ExecutionServices {
        let effective_ai_config = ai_config
            .cloned()
            .or_else(|| workflow.ai_config.clone())
            .unwrap_or(Value::Null);

        ExecutionServices {
            ai_config: effective_ai_config,
            workflow_run_id: workflow.workflow_run_id.clone(),
            project_name: workflow.project_name.clone(),
            workflow_template_name: workflow.workflow_template_name.clone(),
            workflow_template_id: workflow.workflow_template_id.clone(),
            user_id: workflow.user_id.clone(),
            branch_id: workflow.current_branch_id.clone().unwrap_or_default(),
            session_timestamp: chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string(),
            llm: self.llm.clone(),
            http: self.http.clone(),
            queue: Some(self.db.queue.clone()),
        }
    }
}

/// Builds progress info for a pending interaction from the derived position.
fn build_progress(
    workflow_def: &ResolvedWorkflow,
    position: &WorkflowPosition,
) -> Option<WorkflowProgress> {
    let current_step = position.current_step.clone()?;
    let (_, step) = workflow_def.find_step(&current_step)?;
    let module_index = position.current_module_index.min(step.modules.len().saturating_sub(1));
    let current_module = step
        .modules
        .get(module_index)
        .map(|m| m.effective_name().to_string())
        .unwrap_or_default();
    Some(WorkflowProgress {
        current_step,
        current_module,
        step_index: module_index,
    })
}
