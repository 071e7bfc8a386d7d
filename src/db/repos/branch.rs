// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Branch repository - lineage management for retry/jump/recovery forks.
//!
//! A child branch copies its parent's lineage, seals the parent entry with
//! the fork-point event id, and appends itself with no cutoff. Branches are
//! never mutated afterwards.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::client::DBClient;
use crate::db::ids;
use crate::models::{Branch, LineageEntry};

/// Repository for the `branches` collection.
#[derive(Clone)]
pub struct BranchRepository {
    db: Arc<DBClient>,
}

impl BranchRepository {
    pub fn new(db: Arc<DBClient>) -> Self {
        Self { db }
    }

    pub async fn get_branch(&self, branch_id: &str) -> Result<Option<Branch>> {
        let mut rows: Vec<Branch> = self
            .db
            .query_typed(
                "SELECT * FROM branches WHERE branch_id = $branch LIMIT 1",
                vec![("branch".to_string(), json!(branch_id))],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Lineage as `(branch_id, cutoff)` pairs, root first. Empty when the
    /// branch does not exist.
    pub async fn get_branch_lineage(&self, branch_id: &str) -> Result<Vec<(String, Option<String>)>> {
        Ok(self
            .get_branch(branch_id)
            .await?
            .map(|b| b.lineage_pairs())
            .unwrap_or_default())
    }

    /// Creates the root branch of a run: lineage is just itself, no cutoff.
    #[instrument(name = "branch_create_root", skip(self), fields(run = %workflow_run_id))]
    pub async fn create_root_branch(&self, workflow_run_id: &str) -> Result<String> {
        let branch_id = ids::branch_id();
        let branch = Branch {
            branch_id: branch_id.clone(),
            workflow_run_id: workflow_run_id.to_string(),
            lineage: vec![LineageEntry {
                branch_id: branch_id.clone(),
                cutoff_event_id: None,
            }],
            created_at: Utc::now(),
        };
        self.db.create("branches", branch).await?;
        Ok(branch_id)
    }

    /// Creates a branch forking from `parent_branch_id` at `parent_event_id`
    /// (inclusive; `None` means "everything so far") and points the run's
    /// current branch at it.
    #[instrument(name = "branch_create", skip(self), fields(run = %workflow_run_id, parent = %parent_branch_id))]
    pub async fn create_branch(
        &self,
        workflow_run_id: &str,
        parent_branch_id: &str,
        parent_event_id: Option<&str>,
    ) -> Result<String> {
        let new_branch_id = ids::branch_id();

        let parent = self.get_branch(parent_branch_id).await?;

        let mut new_lineage = Vec::new();
        match parent {
            Some(parent_branch) => {
                for entry in parent_branch.lineage {
                    if entry.branch_id == parent_branch_id {
                        // The fork point - seal the parent's cutoff
                        new_lineage.push(LineageEntry {
                            branch_id: entry.branch_id,
                            cutoff_event_id: parent_event_id.map(str::to_string),
                        });
                    } else {
                        new_lineage.push(entry);
                    }
                }
            }
            None => {
                new_lineage.push(LineageEntry {
                    branch_id: parent_branch_id.to_string(),
                    cutoff_event_id: parent_event_id.map(str::to_string),
                });
            }
        }
        new_lineage.push(LineageEntry {
            branch_id: new_branch_id.clone(),
            cutoff_event_id: None,
        });

        let branch = Branch {
            branch_id: new_branch_id.clone(),
            workflow_run_id: workflow_run_id.to_string(),
            lineage: new_lineage,
            created_at: Utc::now(),
        };
        self.db.create("branches", branch).await?;

        self.db
            .execute(
                "UPDATE workflow_runs SET current_branch_id = $branch, updated_at = $now \
                 WHERE workflow_run_id = $run",
                vec![
                    ("branch".to_string(), json!(new_branch_id)),
                    ("now".to_string(), json!(Utc::now())),
                    ("run".to_string(), json!(workflow_run_id)),
                ],
            )
            .await?;

        info!(new_branch = %new_branch_id, cutoff = ?parent_event_id, "Created branch");
        Ok(new_branch_id)
    }

    pub async fn delete_workflow_branches(&self, workflow_run_id: &str) -> Result<()> {
        self.db
            .execute(
                "DELETE FROM branches WHERE workflow_run_id = $run",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await
    }
}
