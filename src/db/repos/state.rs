// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! State repository - derivations over the event log.
//!
//! Everything here is a pure, read-only function of the event log and the
//! branch graph: flat and hierarchical state, position, interaction history
//! and retry context. The only writes are the two fork helpers
//! (`jump_to_module`, `branch_from_interaction_request`), which create
//! branches and never touch events.

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::client::DBClient;
use crate::db::repos::branch::BranchRepository;
use crate::llm::ChatMessage;
use crate::models::{
    CompletedInteraction, EventType, RetryContext, WorkflowEvent, WorkflowPosition,
};

/// Repository for state reconstruction.
#[derive(Clone)]
pub struct StateRepository {
    db: Arc<DBClient>,
    branches: BranchRepository,
}

impl StateRepository {
    pub fn new(db: Arc<DBClient>) -> Self {
        let branches = BranchRepository::new(db.clone());
        Self { db, branches }
    }

    pub async fn get_current_branch_id(&self, workflow_run_id: &str) -> Result<Option<String>> {
        let rows = self
            .db
            .query_json(
                "SELECT current_branch_id FROM workflow_runs WHERE workflow_run_id = $run LIMIT 1",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("current_branch_id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// All events visible from a branch's lineage, cutoffs applied, sorted
    /// by event id. `branch_id = None` uses the run's current branch.
    pub async fn get_lineage_events(
        &self,
        workflow_run_id: &str,
        branch_id: Option<&str>,
        event_types: Option<&[EventType]>,
    ) -> Result<Vec<WorkflowEvent>> {
        let branch_id = match branch_id {
            Some(b) => b.to_string(),
            None => match self.get_current_branch_id(workflow_run_id).await? {
                Some(b) => b,
                None => return Ok(Vec::new()),
            },
        };

        let lineage = self.branches.get_branch_lineage(&branch_id).await?;
        if lineage.is_empty() {
            return Ok(Vec::new());
        }

        // One OR-condition per lineage entry, cutoff inclusive
        let mut conditions = Vec::new();
        let mut params = vec![("run".to_string(), json!(workflow_run_id))];
        for (i, (branch, cutoff)) in lineage.iter().enumerate() {
            let branch_param = format!("b{}", i);
            match cutoff {
                Some(cutoff_id) => {
                    let cutoff_param = format!("c{}", i);
                    conditions.push(format!(
                        "(branch_id = ${} AND event_id <= ${})",
                        branch_param, cutoff_param
                    ));
                    params.push((cutoff_param, json!(cutoff_id)));
                }
                None => conditions.push(format!("branch_id = ${}", branch_param)),
            }
            params.push((branch_param, json!(branch)));
        }

        let mut query = format!(
            "SELECT * FROM events WHERE workflow_run_id = $run AND ({})",
            conditions.join(" OR ")
        );
        if let Some(types) = event_types {
            let names: Vec<&str> = types.iter().map(EventType::as_str).collect();
            query.push_str(" AND event_type IN $types");
            params.push(("types".to_string(), json!(names)));
        }
        query.push_str(" ORDER BY event_id ASC");

        self.db.query_typed(&query, params).await
    }

    /// Flat state map: raw outputs keyed by module name (module_completed
    /// only) plus every `_state_mapped` entry from module and sub-action
    /// completions, later events overwriting earlier ones.
    pub async fn get_module_outputs(
        &self,
        workflow_run_id: &str,
        branch_id: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let events = self
            .get_lineage_events(
                workflow_run_id,
                branch_id,
                Some(&[EventType::ModuleCompleted, EventType::SubActionCompleted]),
            )
            .await?;

        let mut outputs = Map::new();
        for event in events {
            // Sub-action completions must not overwrite raw module data
            if event.event_type == EventType::ModuleCompleted {
                if let Some(module_name) = &event.module_name {
                    outputs.insert(module_name.clone(), event.data.clone());
                }
            }
            if let Some(state_mapped) = event.state_mapped() {
                for (state_key, value) in state_mapped {
                    outputs.insert(state_key.clone(), value.clone());
                }
            }
        }
        Ok(outputs)
    }

    /// Hierarchical view: steps → module → event-type nodes, each tagged
    /// with `_metadata.node_type`. Repeated event types get `.1`, `.2`, ...
    /// suffixes so nothing is lost.
    pub async fn get_module_outputs_hierarchical(
        &self,
        workflow_run_id: &str,
        branch_id: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let events = self
            .get_lineage_events(workflow_run_id, branch_id, None)
            .await?;

        let mut steps = Map::new();
        steps.insert(
            "_metadata".to_string(),
            json!({"node_type": "steps_container"}),
        );

        for event in events {
            let Some(module_name) = event.module_name.clone() else {
                continue;
            };
            let step_id = event.step_id.clone().unwrap_or_else(|| "_unknown".to_string());

            let step_node = steps
                .entry(step_id)
                .or_insert_with(|| json!({"_metadata": {"node_type": "step"}}))
                .as_object_mut()
                .expect("step node is an object");
            let module_node = step_node
                .entry(module_name)
                .or_insert_with(|| json!({"_metadata": {"node_type": "module"}}))
                .as_object_mut()
                .expect("module node is an object");

            let mut data = Map::new();
            data.insert(
                "_metadata".to_string(),
                json!({"node_type": "event_data", "event_type": event.event_type.as_str()}),
            );
            if let Value::Object(payload) = &event.data {
                for (key, value) in payload {
                    data.insert(key.clone(), value.clone());
                }
            }

            let base_key = event.event_type.as_str().to_string();
            if !module_node.contains_key(&base_key) {
                module_node.insert(base_key, Value::Object(data));
            } else {
                let mut n = 1;
                while module_node.contains_key(&format!("{}.{}", base_key, n)) {
                    n += 1;
                }
                module_node.insert(format!("{}.{}", base_key, n), Value::Object(data));
            }
        }

        let mut result = Map::new();
        result.insert("steps".to_string(), Value::Object(steps));
        result.insert("state_mapped".to_string(), Value::Object(Map::new()));
        Ok(result)
    }

    /// Full state for the state endpoints: hierarchical view plus the flat
    /// state map. The file/media tree is owned by external storage and is
    /// attached by the transport layer.
    pub async fn get_full_workflow_state(
        &self,
        workflow_run_id: &str,
        branch_id: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let mut state = self
            .get_module_outputs_hierarchical(workflow_run_id, branch_id)
            .await?;
        let flat = self.get_module_outputs(workflow_run_id, branch_id).await?;
        state.insert("state_mapped".to_string(), Value::Object(flat));
        Ok(state)
    }

    /// Current position for resuming, derived entirely from lineage events.
    pub async fn get_workflow_position(
        &self,
        workflow_run_id: &str,
        branch_id: Option<&str>,
    ) -> Result<WorkflowPosition> {
        let events = self
            .get_lineage_events(workflow_run_id, branch_id, None)
            .await?;

        let completed_steps: Vec<String> = events
            .iter()
            .filter(|e| e.event_type == EventType::StepCompleted)
            .filter_map(|e| e.step_id.clone())
            .collect();

        let step_started = events
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::StepStarted);

        let mut current_step = None;
        let mut current_module_index = 0;

        if let Some(started) = step_started {
            if let Some(step_id) = &started.step_id {
                if !completed_steps.contains(step_id) {
                    current_step = Some(step_id.clone());
                    current_module_index = events
                        .iter()
                        .filter(|e| {
                            e.event_id > started.event_id
                                && e.event_type == EventType::ModuleCompleted
                                && e.step_id.as_deref() == Some(step_id)
                        })
                        .count();
                }
            }
        }

        // Pending = latest request with no later response
        let last_request = events
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::InteractionRequested);
        let last_response = events
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::InteractionResponse);

        let pending_interaction = match (last_request, last_response) {
            (Some(request), Some(response)) if response.event_id > request.event_id => None,
            (Some(request), _) => Some(request.data.clone()),
            (None, _) => None,
        };

        Ok(WorkflowPosition {
            current_step,
            current_module_index,
            completed_steps,
            pending_interaction,
        })
    }

    /// Completed request/response pairs, matched by interaction id and
    /// ordered by response timestamp.
    pub async fn get_interaction_history(
        &self,
        workflow_run_id: &str,
        branch_id: Option<&str>,
    ) -> Result<Vec<CompletedInteraction>> {
        let events = self
            .get_lineage_events(
                workflow_run_id,
                branch_id,
                Some(&[EventType::InteractionRequested, EventType::InteractionResponse]),
            )
            .await?;

        let mut requests: Map<String, Value> = Map::new();
        let mut request_meta: std::collections::HashMap<String, (Option<String>, Option<String>)> =
            std::collections::HashMap::new();
        let mut completed = Vec::new();

        for event in &events {
            let Some(interaction_id) = event.interaction_id().map(str::to_string) else {
                continue;
            };
            match event.event_type {
                EventType::InteractionRequested => {
                    request_meta.insert(
                        interaction_id.clone(),
                        (event.step_id.clone(), event.module_name.clone()),
                    );
                    requests.insert(interaction_id, event.data.clone());
                }
                EventType::InteractionResponse => {
                    if let Some(request) = requests.get(&interaction_id) {
                        let (step_id, module_name) = request_meta
                            .get(&interaction_id)
                            .cloned()
                            .unwrap_or((None, None));
                        let inner_response = event
                            .data
                            .get("response")
                            .cloned()
                            .unwrap_or_else(|| event.data.clone());
                        completed.push(CompletedInteraction {
                            interaction_id: interaction_id.clone(),
                            request: request.clone(),
                            response: inner_response,
                            timestamp: event.timestamp,
                            step_id,
                            module_name,
                        });
                    }
                }
                _ => {}
            }
        }

        completed.sort_by_key(|c| c.timestamp);
        Ok(completed)
    }

    /// Builds the conversation context for retrying a module: prior outputs
    /// as assistant turns interleaved with retry feedback as user turns.
    /// Deliberately spans the whole run, not just the current lineage -
    /// retries stay on the current branch but remember earlier attempts.
    pub async fn get_retry_context(
        &self,
        workflow_run_id: &str,
        target_module: &str,
    ) -> Result<RetryContext> {
        let completed: Vec<WorkflowEvent> = self
            .db
            .query_typed(
                "SELECT * FROM events WHERE workflow_run_id = $run \
                 AND event_type = 'module_completed' AND module_name = $module \
                 ORDER BY event_id ASC",
                vec![
                    ("run".to_string(), json!(workflow_run_id)),
                    ("module".to_string(), json!(target_module)),
                ],
            )
            .await?;
        let retries: Vec<WorkflowEvent> = self
            .db
            .query_typed(
                "SELECT * FROM events WHERE workflow_run_id = $run \
                 AND event_type = 'retry_requested' AND data.target_module = $module \
                 ORDER BY event_id ASC",
                vec![
                    ("run".to_string(), json!(workflow_run_id)),
                    ("module".to_string(), json!(target_module)),
                ],
            )
            .await?;

        let mut conversation_history = Vec::new();

        for (i, completed_event) in completed.iter().enumerate() {
            let response_content = completed_event
                .data
                .get("response")
                .or_else(|| completed_event.data.get("response_text"));

            if let Some(content) = response_content {
                let text = match content {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string_pretty(other).unwrap_or_default(),
                };
                if !text.is_empty() {
                    conversation_history.push(ChatMessage::assistant(text));
                }
            }

            // Feedback that landed between this completion and the next
            let completed_time = completed_event.timestamp;
            let next_completed_time = completed.get(i + 1).map(|e| e.timestamp);

            for retry_event in &retries {
                if retry_event.timestamp > completed_time
                    && next_completed_time.map_or(true, |next| retry_event.timestamp < next)
                {
                    if let Some(feedback) = retry_event.data.get("feedback").and_then(Value::as_str)
                    {
                        conversation_history
                            .push(ChatMessage::user(format!("FEEDBACK FROM USER: {}", feedback)));
                    }
                }
            }
        }

        let feedback = retries
            .last()
            .and_then(|e| e.data.get("feedback"))
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(
            messages = conversation_history.len(),
            module = target_module,
            "Built retry conversation history"
        );
        Ok(RetryContext {
            conversation_history,
            feedback,
        })
    }

    /// Forks a new branch just before the target module's first event and
    /// points the run at it. "Jump to module X" keeps everything up to, but
    /// not including, X's first event.
    #[instrument(name = "state_jump_to_module", skip(self), fields(run = %workflow_run_id))]
    pub async fn jump_to_module(
        &self,
        workflow_run_id: &str,
        target_step: &str,
        target_module: &str,
    ) -> Result<String> {
        let current_branch = self
            .get_current_branch_id(workflow_run_id)
            .await?
            .ok_or_else(|| anyhow!("Workflow '{}' has no current branch", workflow_run_id))?;

        let lineage_events = self
            .get_lineage_events(workflow_run_id, Some(&current_branch), None)
            .await?;

        let first_target = lineage_events
            .iter()
            .find(|e| {
                e.step_id.as_deref() == Some(target_step)
                    && e.module_name.as_deref() == Some(target_module)
            })
            .ok_or_else(|| {
                anyhow!(
                    "Module {}/{} not found in branch lineage",
                    target_step,
                    target_module
                )
            })?;

        // Last event strictly before the target module's first event
        let parent_event = lineage_events
            .iter()
            .take_while(|e| e.event_id < first_target.event_id)
            .last();

        let (parent_branch_id, parent_event_id) = match parent_event {
            Some(event) => (event.branch_id.clone(), Some(event.event_id.clone())),
            // Jumping to the very first module - fork from root with no events
            None => (current_branch.clone(), None),
        };

        let new_branch_id = self
            .branches
            .create_branch(workflow_run_id, &parent_branch_id, parent_event_id.as_deref())
            .await?;

        info!(new_branch = %new_branch_id, "jump_to_module created branch");
        Ok(new_branch_id)
    }

    /// Forks a new branch whose cutoff is the interaction request itself, so
    /// the run re-enters that exact interaction without re-running upstream
    /// modules.
    #[instrument(name = "state_branch_from_interaction", skip(self), fields(run = %workflow_run_id))]
    pub async fn branch_from_interaction_request(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
    ) -> Result<String> {
        let current_branch = self
            .get_current_branch_id(workflow_run_id)
            .await?
            .ok_or_else(|| anyhow!("Workflow '{}' has no current branch", workflow_run_id))?;

        let lineage_events = self
            .get_lineage_events(workflow_run_id, Some(&current_branch), None)
            .await?;

        let target = lineage_events
            .iter()
            .find(|e| {
                e.event_type == EventType::InteractionRequested
                    && e.interaction_id() == Some(interaction_id)
            })
            .ok_or_else(|| anyhow!("Interaction '{}' not found in branch lineage", interaction_id))?;

        let new_branch_id = self
            .branches
            .create_branch(workflow_run_id, &target.branch_id, Some(&target.event_id))
            .await?;

        info!(new_branch = %new_branch_id, "branch_from_interaction_request created branch");
        Ok(new_branch_id)
    }
}
