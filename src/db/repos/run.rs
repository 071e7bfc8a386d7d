// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run repository - workflow run rows and their cached pointers.
//!
//! The row's status and position pointers are a cache over the event log;
//! recovery reconciles them when they drift. A run stays unique for its
//! (user, template name, project) triple while non-terminal.

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::client::DBClient;
use crate::db::ids;
use crate::db::repos::branch::BranchRepository;
use crate::models::{RunStatus, VersionHistoryEntry, WorkflowRun};

/// Repository for the `workflow_runs` collection.
#[derive(Clone)]
pub struct RunRepository {
    db: Arc<DBClient>,
    branches: BranchRepository,
}

impl RunRepository {
    pub fn new(db: Arc<DBClient>) -> Self {
        let branches = BranchRepository::new(db.clone());
        Self { db, branches }
    }

    pub async fn get_workflow(&self, workflow_run_id: &str) -> Result<Option<WorkflowRun>> {
        let mut rows: Vec<WorkflowRun> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_runs WHERE workflow_run_id = $run LIMIT 1",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Finds the non-terminal run for a (user, template name, project)
    /// triple, if any.
    pub async fn find_existing_workflow(
        &self,
        user_id: &str,
        workflow_template_name: &str,
        project_name: &str,
    ) -> Result<Option<WorkflowRun>> {
        let mut rows: Vec<WorkflowRun> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_runs WHERE user_id = $user \
                 AND workflow_template_name = $template AND project_name = $project \
                 AND status NOT IN ['completed', 'error'] \
                 ORDER BY created_at DESC LIMIT 1",
                vec![
                    ("user".to_string(), json!(user_id)),
                    ("template".to_string(), json!(workflow_template_name)),
                    ("project".to_string(), json!(project_name)),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Gets the existing run for the triple or creates a new one with a root
    /// branch. Returns `(run_id, is_new, branch_id)`.
    #[instrument(name = "run_get_or_create", skip(self), fields(user = %user_id, project = %project_name))]
    pub async fn get_or_create_workflow_run(
        &self,
        project_name: &str,
        user_id: &str,
        workflow_template_name: &str,
        workflow_template_id: &str,
        active_version_id: &str,
    ) -> Result<(String, bool, String)> {
        if let Some(existing) = self
            .find_existing_workflow(user_id, workflow_template_name, project_name)
            .await?
        {
            info!(run = %existing.workflow_run_id, "Found existing workflow run");
            let branch = existing
                .current_branch_id
                .ok_or_else(|| anyhow::anyhow!("Existing run has no current branch"))?;
            return Ok((existing.workflow_run_id, false, branch));
        }

        let workflow_run_id = ids::run_id();
        let branch_id = self.branches.create_root_branch(&workflow_run_id).await?;

        let now = Utc::now();
        let run = WorkflowRun {
            workflow_run_id: workflow_run_id.clone(),
            user_id: user_id.to_string(),
            project_name: project_name.to_string(),
            workflow_template_name: workflow_template_name.to_string(),
            workflow_template_id: workflow_template_id.to_string(),
            current_workflow_version_id: Some(active_version_id.to_string()),
            current_branch_id: Some(branch_id.clone()),
            status: RunStatus::Created,
            current_step: None,
            current_step_name: None,
            current_module: None,
            parent_workflow_id: None,
            visible_in_ui: true,
            ai_config: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.db.create("workflow_runs", run).await?;

        info!(run = %workflow_run_id, "Created new workflow run");
        Ok((workflow_run_id, true, branch_id))
    }

    /// Creates a hidden child run for a sub-action, with its own root branch.
    pub async fn create_child_workflow_run(
        &self,
        parent_workflow_run_id: &str,
        execution_id: &str,
    ) -> Result<String> {
        let child_id = ids::sub_run_id();
        let branch_id = self.branches.create_root_branch(&child_id).await?;

        let now = Utc::now();
        let run = WorkflowRun {
            workflow_run_id: child_id.clone(),
            user_id: String::new(),
            project_name: String::new(),
            workflow_template_name: String::new(),
            workflow_template_id: String::new(),
            current_workflow_version_id: None,
            current_branch_id: Some(branch_id),
            status: RunStatus::Processing,
            current_step: None,
            current_step_name: None,
            current_module: None,
            parent_workflow_id: Some(parent_workflow_run_id.to_string()),
            visible_in_ui: false,
            ai_config: Some(json!({"execution_id": execution_id})),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.db.create("workflow_runs", run).await?;
        Ok(child_id)
    }

    /// Updates cached status and current-position pointers.
    pub async fn update_workflow_status(
        &self,
        workflow_run_id: &str,
        status: RunStatus,
        current_step: Option<&str>,
        current_step_name: Option<&str>,
        current_module: Option<&str>,
    ) -> Result<()> {
        let mut sets = vec!["status = $status".to_string(), "updated_at = $now".to_string()];
        let mut params = vec![
            ("status".to_string(), json!(status.as_str())),
            ("now".to_string(), json!(Utc::now())),
            ("run".to_string(), json!(workflow_run_id)),
        ];
        if let Some(step) = current_step {
            sets.push("current_step = $step".to_string());
            params.push(("step".to_string(), json!(step)));
        }
        if let Some(step_name) = current_step_name {
            sets.push("current_step_name = $step_name".to_string());
            params.push(("step_name".to_string(), json!(step_name)));
        }
        if let Some(module) = current_module {
            sets.push("current_module = $module".to_string());
            params.push(("module".to_string(), json!(module)));
        }
        if status == RunStatus::Completed {
            sets.push("completed_at = $now".to_string());
        }

        let query = format!(
            "UPDATE workflow_runs SET {} WHERE workflow_run_id = $run",
            sets.join(", ")
        );
        self.db.execute(&query, params).await
    }

    pub async fn set_current_version(
        &self,
        workflow_run_id: &str,
        workflow_version_id: &str,
    ) -> Result<()> {
        self.db
            .execute(
                "UPDATE workflow_runs SET current_workflow_version_id = $version, updated_at = $now \
                 WHERE workflow_run_id = $run",
                vec![
                    ("version".to_string(), json!(workflow_version_id)),
                    ("now".to_string(), json!(Utc::now())),
                    ("run".to_string(), json!(workflow_run_id)),
                ],
            )
            .await
    }

    pub async fn set_ai_config(&self, workflow_run_id: &str, ai_config: &Value) -> Result<()> {
        self.db
            .execute(
                "UPDATE workflow_runs SET ai_config = $config, updated_at = $now \
                 WHERE workflow_run_id = $run",
                vec![
                    ("config".to_string(), ai_config.clone()),
                    ("now".to_string(), json!(Utc::now())),
                    ("run".to_string(), json!(workflow_run_id)),
                ],
            )
            .await
    }

    /// Force-reset: clears pointers, re-creates a fresh root branch and
    /// returns its id. Event purge is the caller's responsibility.
    pub async fn reset_workflow(&self, workflow_run_id: &str) -> Result<String> {
        let branch_id = self.branches.create_root_branch(workflow_run_id).await?;
        self.db
            .execute(
                "UPDATE workflow_runs SET status = 'created', current_step = NONE, \
                 current_step_name = NONE, current_module = NONE, completed_at = NONE, \
                 current_branch_id = $branch, updated_at = $now WHERE workflow_run_id = $run",
                vec![
                    ("branch".to_string(), json!(branch_id)),
                    ("now".to_string(), json!(Utc::now())),
                    ("run".to_string(), json!(workflow_run_id)),
                ],
            )
            .await?;
        Ok(branch_id)
    }

    /// Appends a version-history entry; written atomically next to every
    /// version-pointer switch.
    pub async fn add_version_history_entry(
        &self,
        workflow_run_id: &str,
        workflow_version_id: &str,
        client_capabilities: Vec<String>,
    ) -> Result<()> {
        let entry = VersionHistoryEntry {
            workflow_run_id: workflow_run_id.to_string(),
            workflow_version_id: workflow_version_id.to_string(),
            client_capabilities,
            created_at: Utc::now(),
        };
        self.db.create("workflow_run_version_history", entry).await
    }

    pub async fn get_version_history(
        &self,
        workflow_run_id: &str,
    ) -> Result<Vec<VersionHistoryEntry>> {
        self.db
            .query_typed(
                "SELECT * FROM workflow_run_version_history WHERE workflow_run_id = $run \
                 ORDER BY created_at ASC",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await
    }

    /// Visible runs with non-terminal status.
    pub async fn list_active(&self) -> Result<Vec<WorkflowRun>> {
        self.db
            .query_typed(
                "SELECT * FROM workflow_runs WHERE visible_in_ui = true \
                 AND status IN ['created', 'processing', 'awaiting_input'] \
                 ORDER BY updated_at DESC",
                vec![],
            )
            .await
    }

    /// All visible runs.
    pub async fn list_all(&self) -> Result<Vec<WorkflowRun>> {
        self.db
            .query_typed(
                "SELECT * FROM workflow_runs WHERE visible_in_ui = true ORDER BY updated_at DESC",
                vec![],
            )
            .await
    }

    pub async fn delete_workflow(&self, workflow_run_id: &str) -> Result<()> {
        self.db
            .execute(
                "DELETE FROM workflow_runs WHERE workflow_run_id = $run",
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, RunRepository) {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let db = DBClient::new(temp_dir.path().join("db").to_str().unwrap())
            .await
            .expect("DB creation failed");
        db.initialize_schema().await.expect("Schema init failed");
        (temp_dir, RunRepository::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent_while_non_terminal() {
        let (_tmp, repo) = setup().await;

        let (run_a, is_new_a, _) = repo
            .get_or_create_workflow_run("proj", "user1", "demo", "tpl_1", "ver_1")
            .await
            .unwrap();
        assert!(is_new_a);

        let (run_b, is_new_b, _) = repo
            .get_or_create_workflow_run("proj", "user1", "demo", "tpl_1", "ver_1")
            .await
            .unwrap();
        assert!(!is_new_b);
        assert_eq!(run_a, run_b);
    }

    #[tokio::test]
    async fn test_completed_run_is_not_resumed() {
        let (_tmp, repo) = setup().await;

        let (run_a, _, _) = repo
            .get_or_create_workflow_run("proj", "user1", "demo", "tpl_1", "ver_1")
            .await
            .unwrap();
        repo.update_workflow_status(&run_a, RunStatus::Completed, None, None, None)
            .await
            .unwrap();

        let (run_b, is_new, _) = repo
            .get_or_create_workflow_run("proj", "user1", "demo", "tpl_1", "ver_1")
            .await
            .unwrap();
        assert!(is_new);
        assert_ne!(run_a, run_b);
    }

    #[tokio::test]
    async fn test_status_update_sets_pointers() {
        let (_tmp, repo) = setup().await;
        let (run, _, _) = repo
            .get_or_create_workflow_run("proj", "user1", "demo", "tpl_1", "ver_1")
            .await
            .unwrap();

        repo.update_workflow_status(
            &run,
            RunStatus::Processing,
            Some("step1"),
            Some("Step 1: Draft"),
            None,
        )
        .await
        .unwrap();

        let row = repo.get_workflow(&run).await.unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Processing);
        assert_eq!(row.current_step.as_deref(), Some("step1"));
        assert_eq!(row.current_step_name.as_deref(), Some("Step 1: Draft"));
        assert!(row.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_child_run_is_hidden() {
        let (_tmp, repo) = setup().await;
        let child = repo
            .create_child_workflow_run("wf_parent", "more_abc")
            .await
            .unwrap();
        assert!(child.starts_with("wf_sub_"));

        let row = repo.get_workflow(&child).await.unwrap().unwrap();
        assert!(!row.visible_in_ui);
        assert_eq!(row.parent_workflow_id.as_deref(), Some("wf_parent"));
        assert_eq!(row.status, RunStatus::Processing);

        let active = repo.list_active().await.unwrap();
        assert!(active.iter().all(|r| r.workflow_run_id != child));
    }

    #[tokio::test]
    async fn test_version_history_round_trip() {
        let (_tmp, repo) = setup().await;
        repo.add_version_history_entry("wf_1", "ver_1", vec!["image".to_string()])
            .await
            .unwrap();
        repo.add_version_history_entry("wf_1", "ver_2", vec![])
            .await
            .unwrap();

        let history = repo.get_version_history("wf_1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].workflow_version_id, "ver_1");
        assert_eq!(history[1].workflow_version_id, "ver_2");
    }
}
