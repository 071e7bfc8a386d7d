// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Workflow run model.
//!
//! A run is one live execution of a workflow for a (user, template, project)
//! triple. The row carries cached status and current-position pointers; the
//! event log remains the source of truth and recovery repairs any drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet executed
    #[default]
    Created,
    /// Executor loop is advancing
    Processing,
    /// Suspended on an interactive module
    AwaitingInput,
    /// All steps finished
    Completed,
    /// A module failed; run halted
    Error,
}

impl RunStatus {
    /// True for statuses that end the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::AwaitingInput => "awaiting_input",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "processing" => Ok(Self::Processing),
            "awaiting_input" => Ok(Self::AwaitingInput),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// A workflow run row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_run_id: String,
    pub user_id: String,
    pub project_name: String,
    pub workflow_template_name: String,
    pub workflow_template_id: String,
    /// Version the run is currently executing (always a runnable version)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_workflow_version_id: Option<String>,
    /// Branch new events are appended to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_branch_id: Option<String>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_module: Option<String>,
    /// Parent run id when this is a hidden sub-action child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
    /// Hidden child runs are filtered out of listings
    #[serde(default = "default_visible")]
    pub visible_in_ui: bool,
    /// Per-run AI configuration override (provider, model, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_config: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_visible() -> bool {
    true
}

/// One entry of a run's version history (appended on every version switch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub workflow_run_id: String,
    pub workflow_version_id: String,
    #[serde(default)]
    pub client_capabilities: Vec<String>,
    pub created_at: DateTime<Utc>,
}
