// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Template and version models.
//!
//! A template owns a sequence of immutable version snapshots. Raw versions
//! have no capability variants; unresolved versions are parents of resolved
//! children selected by client capabilities. Only raw and resolved versions
//! are runnable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::ResolvedWorkflow;

/// Sentinel user id owning global templates.
pub const GLOBAL_TEMPLATE_USER_ID: &str = "global";

/// Template ownership scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateScope {
    User,
    Global,
}

/// Template listing visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateVisibility {
    Visible,
    /// Per-user shadow of a global template, kept out of listings
    Hidden,
    Public,
}

/// A workflow template row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub workflow_template_id: String,
    pub workflow_template_name: String,
    pub user_id: String,
    pub scope: TemplateScope,
    pub visibility: TemplateVisibility,
    /// Global template this hidden shadow was derived from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a version entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Json,
    Zip,
}

/// Kind of version snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    /// Source with no execution groups; runnable as-is
    Raw,
    /// Source with execution groups; has resolved children, never runnable
    Unresolved,
    /// One concrete path through execution groups; runnable
    Resolved,
}

/// One capability requirement of a resolved version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequirement {
    pub capability: String,
    #[serde(default)]
    pub priority: i64,
}

/// A workflow version row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub workflow_version_id: String,
    pub workflow_template_id: String,
    /// `sha256:<hex>` over the canonical definition JSON
    pub content_hash: String,
    pub source_type: SourceType,
    pub version_type: VersionType,
    /// For resolved versions: the source version they were expanded from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_workflow_version_id: Option<String>,
    /// For resolved versions: capabilities gathered along the selected path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<CapabilityRequirement>,
    pub resolved_workflow: ResolvedWorkflow,
    pub created_at: DateTime<Utc>,
}

impl WorkflowVersion {
    /// Sum of requirement priorities; the capability selector picks the
    /// matching resolved child with the highest score.
    pub fn capability_score(&self) -> i64 {
        self.requires.iter().map(|r| r.priority).sum()
    }

    /// True when a run may execute this version directly.
    pub fn is_runnable(&self) -> bool {
        !matches!(self.version_type, VersionType::Unresolved)
    }
}

/// A pre-expanded execution-group variant, produced by the external
/// expansion step and handed to the version store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedVariant {
    pub flattened_workflow: ResolvedWorkflow,
    #[serde(default)]
    pub requires: Vec<CapabilityRequirement>,
    /// Group-id → chosen path; empty means the source had no groups
    #[serde(default)]
    pub selected_paths: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(ty: VersionType, requires: Vec<CapabilityRequirement>) -> WorkflowVersion {
        WorkflowVersion {
            workflow_version_id: "ver_1".to_string(),
            workflow_template_id: "tpl_1".to_string(),
            content_hash: "sha256:abc".to_string(),
            source_type: SourceType::Json,
            version_type: ty,
            parent_workflow_version_id: None,
            requires,
            resolved_workflow: ResolvedWorkflow::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_capability_score_sums_priorities() {
        let v = version(
            VersionType::Resolved,
            vec![
                CapabilityRequirement {
                    capability: "image".to_string(),
                    priority: 10,
                },
                CapabilityRequirement {
                    capability: "audio".to_string(),
                    priority: 5,
                },
            ],
        );
        assert_eq!(v.capability_score(), 15);
    }

    #[test]
    fn test_unresolved_not_runnable() {
        assert!(version(VersionType::Raw, vec![]).is_runnable());
        assert!(version(VersionType::Resolved, vec![]).is_runnable());
        assert!(!version(VersionType::Unresolved, vec![]).is_runnable());
    }
}
