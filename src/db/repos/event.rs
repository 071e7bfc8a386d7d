// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event repository - the append-only log.
//!
//! Events are created once and never updated; the only delete path is a
//! whole-run purge. Ids come from [`crate::db::ids::event_id`] and are
//! time-sortable, so `ORDER BY event_id` is the run's total order.

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::db::client::DBClient;
use crate::db::ids;
use crate::models::{EventType, WorkflowEvent};

/// Optional fields of an event append.
#[derive(Debug, Default, Clone)]
pub struct EventWrite {
    pub step_id: Option<String>,
    pub module_name: Option<String>,
    pub data: Option<Value>,
    /// Branch override; defaults to the run's current branch
    pub branch_id: Option<String>,
    /// Version override; defaults to the run's current version
    pub workflow_version_id: Option<String>,
}

/// Repository for the `events` collection.
#[derive(Clone)]
pub struct EventRepository {
    db: Arc<DBClient>,
}

impl EventRepository {
    pub fn new(db: Arc<DBClient>) -> Self {
        Self { db }
    }

    /// Appends an event to the log and returns it.
    #[instrument(name = "event_store", skip(self, write), fields(run = %workflow_run_id, event_type = %event_type))]
    pub async fn store_event(
        &self,
        workflow_run_id: &str,
        event_type: EventType,
        write: EventWrite,
    ) -> Result<WorkflowEvent> {
        let (branch_id, version_id) = match (write.branch_id, write.workflow_version_id) {
            (Some(branch), version) => (branch, version),
            (None, version) => {
                let run = self.run_pointers(workflow_run_id).await?;
                (
                    run.0
                        .ok_or_else(|| anyhow::anyhow!("Run {} has no current branch", workflow_run_id))?,
                    version.or(run.1),
                )
            }
        };

        let event = WorkflowEvent {
            event_id: ids::event_id(),
            workflow_run_id: workflow_run_id.to_string(),
            branch_id,
            workflow_version_id: version_id,
            event_type,
            step_id: write.step_id,
            module_name: write.module_name,
            data: write.data.unwrap_or_else(|| json!({})),
            timestamp: Utc::now(),
        };

        self.db.create("events", event.clone()).await?;
        debug!(event_id = %event.event_id, "Event appended");
        Ok(event)
    }

    /// Latest event of a type for a run, across all branches.
    pub async fn get_latest_event(
        &self,
        workflow_run_id: &str,
        event_type: EventType,
    ) -> Result<Option<WorkflowEvent>> {
        let mut rows: Vec<WorkflowEvent> = self
            .db
            .query_typed(
                "SELECT * FROM events WHERE workflow_run_id = $run AND event_type = $type \
                 ORDER BY event_id DESC LIMIT 1",
                vec![
                    ("run".to_string(), json!(workflow_run_id)),
                    ("type".to_string(), json!(event_type.as_str())),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    /// All events of a run in id order, optionally capped.
    pub async fn get_events(
        &self,
        workflow_run_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowEvent>> {
        let query = match limit {
            Some(n) => format!(
                "SELECT * FROM events WHERE workflow_run_id = $run ORDER BY event_id ASC LIMIT {}",
                n
            ),
            None => {
                "SELECT * FROM events WHERE workflow_run_id = $run ORDER BY event_id ASC".to_string()
            }
        };
        self.db
            .query_typed(&query, vec![("run".to_string(), json!(workflow_run_id))])
            .await
    }

    /// Finds an interaction request event by its embedded interaction id.
    pub async fn find_interaction_request(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
    ) -> Result<Option<WorkflowEvent>> {
        let mut rows: Vec<WorkflowEvent> = self
            .db
            .query_typed(
                "SELECT * FROM events WHERE workflow_run_id = $run \
                 AND event_type = 'interaction_requested' \
                 AND data.interaction_id = $interaction \
                 ORDER BY event_id DESC LIMIT 1",
                vec![
                    ("run".to_string(), json!(workflow_run_id)),
                    ("interaction".to_string(), json!(interaction_id)),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Purges all events of a run. Only used by delete/force-reset.
    pub async fn delete_workflow_events(&self, workflow_run_id: &str) -> Result<()> {
        self.db
            .execute(
                "DELETE FROM events WHERE workflow_run_id = $run",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await
    }

    async fn run_pointers(
        &self,
        workflow_run_id: &str,
    ) -> Result<(Option<String>, Option<String>)> {
        let rows = self
            .db
            .query_json(
                "SELECT current_branch_id, current_workflow_version_id FROM workflow_runs \
                 WHERE workflow_run_id = $run LIMIT 1",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok((None, None));
        };
        Ok((
            row.get("current_branch_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            row.get("current_workflow_version_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        ))
    }
}
