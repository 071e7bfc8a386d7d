// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Workflow state recovery.
//!
//! The event log is the source of truth; the run row's status is a cache.
//! When the two disagree, recovery forks a branch at the last stable event
//! and resets the run to processing. Applied silently before execution;
//! callers never see it as an error.

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, instrument};

use crate::db::Database;
use crate::models::{EventType, RunStatus, WorkflowEvent};

/// Audit record of an applied recovery.
#[derive(Debug, Clone)]
pub struct RecoveryInfo {
    pub reason: String,
    pub previous_branch_id: Option<String>,
    pub new_branch_id: String,
    pub cutoff_event_id: String,
}

impl Database {
    /// Detects and repairs cached-status/derived-position inconsistencies.
    ///
    /// Returns `None` when the run is consistent (or terminal); otherwise
    /// the applied recovery. A second pass right after a recovery is always
    /// a no-op.
    #[instrument(name = "recover_workflow", skip(self), fields(run = %workflow_run_id))]
    pub async fn recover_workflow(&self, workflow_run_id: &str) -> Result<Option<RecoveryInfo>> {
        let Some(workflow) = self.runs.get_workflow(workflow_run_id).await? else {
            return Ok(None);
        };

        if workflow.status.is_terminal() {
            return Ok(None);
        }

        let position = self
            .state
            .get_workflow_position(workflow_run_id, None)
            .await?;
        let pending = position.pending_interaction.is_some();

        let reason = match workflow.status {
            // A1: cached says waiting, log says nothing is pending
            RunStatus::AwaitingInput if !pending => {
                Some("A1: Status awaiting_input but no pending interaction".to_string())
            }
            // A2: cached says running, log says an interaction is pending
            RunStatus::Processing if pending => {
                Some("A2: Status processing but has pending interaction".to_string())
            }
            // A3: cached says running, log says every step is done
            RunStatus::Processing => {
                let mut all_done = None;
                if let Some(version_id) = &workflow.current_workflow_version_id {
                    if let Some(resolved) = self.versions.get_resolved_workflow(version_id).await? {
                        let step_ids: Vec<&str> =
                            resolved.steps.iter().map(|s| s.step_id.as_str()).collect();
                        if !step_ids.is_empty()
                            && step_ids
                                .iter()
                                .all(|s| position.completed_steps.iter().any(|c| c == s))
                        {
                            all_done =
                                Some("A3: Status processing but all steps completed".to_string());
                        }
                    }
                }
                all_done
            }
            _ => None,
        };

        let Some(reason) = reason else {
            return Ok(None);
        };

        info!(reason = %reason, "Detected workflow inconsistency");

        let events = self
            .state
            .get_lineage_events(workflow_run_id, None, None)
            .await?;
        let Some(last_stable) = find_last_stable_event(&events) else {
            error!("No stable event found, cannot recover");
            return Ok(None);
        };

        info!(
            event_type = %last_stable.event_type,
            event_id = %last_stable.event_id,
            "Forking recovery branch at last stable event"
        );

        // Fork from the branch owning the stable event, not the current
        // branch - the stable event may live on an ancestor.
        let previous_branch_id = workflow.current_branch_id.clone();
        let new_branch_id = self
            .branches
            .create_branch(
                workflow_run_id,
                &last_stable.branch_id,
                Some(&last_stable.event_id),
            )
            .await?;

        self.runs
            .update_workflow_status(workflow_run_id, RunStatus::Processing, None, None, None)
            .await?;

        self.events
            .store_event(
                workflow_run_id,
                EventType::WorkflowRecovered,
                crate::db::repos::event::EventWrite {
                    data: Some(json!({
                        "reason": reason,
                        "previous_branch_id": previous_branch_id,
                        "new_branch_id": new_branch_id,
                        "cutoff_event_id": last_stable.event_id,
                    })),
                    branch_id: Some(new_branch_id.clone()),
                    workflow_version_id: workflow.current_workflow_version_id.clone(),
                    ..Default::default()
                },
            )
            .await?;

        info!(new_branch = %new_branch_id, "Recovered workflow");

        Ok(Some(RecoveryInfo {
            reason,
            previous_branch_id,
            new_branch_id,
            cutoff_event_id: last_stable.event_id.clone(),
        }))
    }
}

/// Last event that is safe to use as a recovery cutoff.
///
/// `step_completed` and `module_completed` are the only stable points.
/// `interaction_response` is deliberately excluded: cutting there keeps the
/// answered interaction in the lineage while recovery re-runs the module,
/// duplicating the interaction in history. Cut at the module completion
/// before it instead.
fn find_last_stable_event(events: &[WorkflowEvent]) -> Option<&WorkflowEvent> {
    events.iter().rev().find(|e| {
        matches!(
            e.event_type,
            EventType::StepCompleted | EventType::ModuleCompleted
        )
    })
}
