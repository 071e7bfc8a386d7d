// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Version repository - templates and immutable definition snapshots.
//!
//! Versions are deduplicated by content hash per template. A raw version
//! becomes unresolved exactly once, when its resolved children (one per
//! execution-group path) are first inserted. Capability selection picks the
//! matching resolved child with the highest priority sum.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::db::client::DBClient;
use crate::db::ids;
use crate::models::{
    CapabilityRequirement, ExpandedVariant, ResolvedWorkflow, SourceType, TemplateScope,
    TemplateVisibility, VersionType, WorkflowTemplate, WorkflowVersion, GLOBAL_TEMPLATE_USER_ID,
};

/// Counts returned by copy/sync operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub inserted: usize,
    pub existing: usize,
}

/// Repository for `workflow_templates` and `workflow_versions`.
#[derive(Clone)]
pub struct VersionRepository {
    db: Arc<DBClient>,
}

impl VersionRepository {
    pub fn new(db: Arc<DBClient>) -> Self {
        Self { db }
    }

    /// Canonical content hash of a definition tree: `sha256:<hex>` over the
    /// JSON with recursively sorted keys.
    pub fn content_hash(workflow: &Value) -> String {
        fn canonicalize(value: &Value) -> Value {
            match value {
                Value::Object(map) => {
                    let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
                    sorted.sort_by_key(|(k, _)| k.as_str());
                    let mut out = serde_json::Map::new();
                    for (k, v) in sorted {
                        out.insert(k.clone(), canonicalize(v));
                    }
                    Value::Object(out)
                }
                Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
                other => other.clone(),
            }
        }
        let canonical = serde_json::to_string(&canonicalize(workflow)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("sha256:{:x}", hasher.finalize())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub async fn get_template_by_id(&self, template_id: &str) -> Result<Option<WorkflowTemplate>> {
        let mut rows: Vec<WorkflowTemplate> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_templates WHERE workflow_template_id = $id LIMIT 1",
                vec![("id".to_string(), json!(template_id))],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Idempotent per (name, user, scope=user).
    pub async fn get_or_create_template(
        &self,
        workflow_template_name: &str,
        user_id: &str,
    ) -> Result<(String, bool)> {
        let mut rows: Vec<WorkflowTemplate> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_templates WHERE workflow_template_name = $name \
                 AND user_id = $user AND scope = 'user' LIMIT 1",
                vec![
                    ("name".to_string(), json!(workflow_template_name)),
                    ("user".to_string(), json!(user_id)),
                ],
            )
            .await?;
        if let Some(existing) = rows.pop() {
            return Ok((existing.workflow_template_id, false));
        }

        let template_id = ids::template_id();
        let now = Utc::now();
        let template = WorkflowTemplate {
            workflow_template_id: template_id.clone(),
            workflow_template_name: workflow_template_name.to_string(),
            user_id: user_id.to_string(),
            scope: TemplateScope::User,
            visibility: TemplateVisibility::Visible,
            derived_from: None,
            created_at: now,
            updated_at: now,
        };
        self.db.create("workflow_templates", template).await?;
        Ok((template_id, true))
    }

    /// Idempotent per (name, scope=global).
    pub async fn get_or_create_global_template(
        &self,
        workflow_template_name: &str,
    ) -> Result<(String, bool)> {
        let mut rows: Vec<WorkflowTemplate> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_templates WHERE workflow_template_name = $name \
                 AND scope = 'global' LIMIT 1",
                vec![("name".to_string(), json!(workflow_template_name))],
            )
            .await?;
        if let Some(existing) = rows.pop() {
            return Ok((existing.workflow_template_id, false));
        }

        let template_id = ids::template_id();
        let now = Utc::now();
        let template = WorkflowTemplate {
            workflow_template_id: template_id.clone(),
            workflow_template_name: workflow_template_name.to_string(),
            user_id: GLOBAL_TEMPLATE_USER_ID.to_string(),
            scope: TemplateScope::Global,
            visibility: TemplateVisibility::Public,
            derived_from: None,
            created_at: now,
            updated_at: now,
        };
        self.db.create("workflow_templates", template).await?;
        Ok((template_id, true))
    }

    /// Per-user hidden shadow of a global template, used to isolate each
    /// user's version history. Returns `(id, is_new, synthetic_name)`.
    pub async fn get_or_create_hidden_template(
        &self,
        global_template_id: &str,
        user_id: &str,
    ) -> Result<(String, bool, String)> {
        let template_name = format!("global_{}_{}", global_template_id, user_id);

        let mut rows: Vec<WorkflowTemplate> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_templates WHERE workflow_template_name = $name \
                 AND user_id = $user AND scope = 'user' LIMIT 1",
                vec![
                    ("name".to_string(), json!(template_name)),
                    ("user".to_string(), json!(user_id)),
                ],
            )
            .await?;
        if let Some(existing) = rows.pop() {
            return Ok((existing.workflow_template_id, false, template_name));
        }

        let template_id = ids::template_id();
        let now = Utc::now();
        let template = WorkflowTemplate {
            workflow_template_id: template_id.clone(),
            workflow_template_name: template_name.clone(),
            user_id: user_id.to_string(),
            scope: TemplateScope::User,
            visibility: TemplateVisibility::Hidden,
            derived_from: Some(global_template_id.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.db.create("workflow_templates", template).await?;
        Ok((template_id, true, template_name))
    }

    /// Visible user templates, for the template listing endpoint.
    pub async fn get_templates_for_user(&self, user_id: &str) -> Result<Vec<WorkflowTemplate>> {
        self.db
            .query_typed(
                "SELECT * FROM workflow_templates WHERE user_id = $user \
                 AND visibility = 'visible' ORDER BY created_at ASC",
                vec![("user".to_string(), json!(user_id))],
            )
            .await
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    pub async fn get_workflow_version_by_id(
        &self,
        version_id: &str,
    ) -> Result<Option<WorkflowVersion>> {
        let mut rows: Vec<WorkflowVersion> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_versions WHERE workflow_version_id = $id LIMIT 1",
                vec![("id".to_string(), json!(version_id))],
            )
            .await?;
        Ok(rows.pop())
    }

    pub async fn get_version_by_content_hash(
        &self,
        template_id: &str,
        content_hash: &str,
    ) -> Result<Option<WorkflowVersion>> {
        let mut rows: Vec<WorkflowVersion> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_versions WHERE workflow_template_id = $template \
                 AND content_hash = $hash LIMIT 1",
                vec![
                    ("template".to_string(), json!(template_id)),
                    ("hash".to_string(), json!(content_hash)),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Latest source (raw or unresolved) version of a user's template.
    pub async fn get_latest_source_version(
        &self,
        workflow_template_name: &str,
        user_id: &str,
    ) -> Result<Option<WorkflowVersion>> {
        let (template_id, is_new) = self
            .get_or_create_template_lookup(workflow_template_name, user_id)
            .await?;
        if is_new {
            return Ok(None);
        }
        let mut rows: Vec<WorkflowVersion> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_versions WHERE workflow_template_id = $template \
                 AND version_type IN ['raw', 'unresolved'] ORDER BY created_at DESC LIMIT 1",
                vec![("template".to_string(), json!(template_id))],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn get_or_create_template_lookup(
        &self,
        workflow_template_name: &str,
        user_id: &str,
    ) -> Result<(String, bool)> {
        let mut rows: Vec<WorkflowTemplate> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_templates WHERE workflow_template_name = $name \
                 AND user_id = $user LIMIT 1",
                vec![
                    ("name".to_string(), json!(workflow_template_name)),
                    ("user".to_string(), json!(user_id)),
                ],
            )
            .await?;
        match rows.pop() {
            Some(t) => Ok((t.workflow_template_id, false)),
            None => Ok((String::new(), true)),
        }
    }

    /// Source (raw/unresolved) versions of a template, newest first.
    pub async fn get_source_versions_for_template(
        &self,
        template_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowVersion>> {
        self.db
            .query_typed(
                &format!(
                    "SELECT * FROM workflow_versions WHERE workflow_template_id = $template \
                     AND version_type IN ['raw', 'unresolved'] \
                     ORDER BY created_at DESC LIMIT {}",
                    limit
                ),
                vec![("template".to_string(), json!(template_id))],
            )
            .await
    }

    pub async fn get_resolved_workflow(&self, version_id: &str) -> Result<Option<ResolvedWorkflow>> {
        Ok(self
            .get_workflow_version_by_id(version_id)
            .await?
            .map(|v| v.resolved_workflow))
    }

    async fn insert_version(&self, version: WorkflowVersion) -> Result<()> {
        self.db.create("workflow_versions", version).await
    }

    /// Gets or creates the source version for a template, deduplicated by
    /// content hash. Returns `(version_id, template_id, is_new)`.
    pub async fn get_or_create_workflow_version(
        &self,
        content_hash: &str,
        source_type: SourceType,
        resolved_workflow: &ResolvedWorkflow,
        workflow_template_name: &str,
        user_id: &str,
    ) -> Result<(String, String, bool)> {
        let (template_id, _) = self
            .get_or_create_template(workflow_template_name, user_id)
            .await?;

        if let Some(existing) = self
            .get_version_by_content_hash(&template_id, content_hash)
            .await?
        {
            return Ok((existing.workflow_version_id, template_id, false));
        }

        let version_id = ids::version_id();
        self.insert_version(WorkflowVersion {
            workflow_version_id: version_id.clone(),
            workflow_template_id: template_id.clone(),
            content_hash: content_hash.to_string(),
            source_type,
            version_type: VersionType::Raw,
            parent_workflow_version_id: None,
            requires: Vec::new(),
            resolved_workflow: resolved_workflow.clone(),
            created_at: Utc::now(),
        })
        .await?;
        Ok((version_id, template_id, true))
    }

    /// Gets or creates a resolved child version by content hash.
    pub async fn create_resolved_version(
        &self,
        template_id: &str,
        resolved_workflow: &ResolvedWorkflow,
        parent_workflow_version_id: &str,
        requires: Vec<CapabilityRequirement>,
    ) -> Result<String> {
        let content_hash = Self::content_hash(&serde_json::to_value(resolved_workflow)?);

        if let Some(existing) = self
            .get_version_by_content_hash(template_id, &content_hash)
            .await?
        {
            return Ok(existing.workflow_version_id);
        }

        let version_id = ids::version_id();
        self.insert_version(WorkflowVersion {
            workflow_version_id: version_id.clone(),
            workflow_template_id: template_id.to_string(),
            content_hash,
            source_type: SourceType::Json,
            version_type: VersionType::Resolved,
            parent_workflow_version_id: Some(parent_workflow_version_id.to_string()),
            requires,
            resolved_workflow: resolved_workflow.clone(),
            created_at: Utc::now(),
        })
        .await?;
        Ok(version_id)
    }

    /// Raw → unresolved promotion; happens once, when resolved children are
    /// first inserted.
    pub async fn set_version_type(&self, version_id: &str, version_type: VersionType) -> Result<()> {
        let type_str = match version_type {
            VersionType::Raw => "raw",
            VersionType::Unresolved => "unresolved",
            VersionType::Resolved => "resolved",
        };
        self.db
            .execute(
                "UPDATE workflow_versions SET version_type = $type WHERE workflow_version_id = $id",
                vec![
                    ("type".to_string(), json!(type_str)),
                    ("id".to_string(), json!(version_id)),
                ],
            )
            .await
    }

    /// Stores a source version plus its pre-expanded execution-group
    /// variants, then promotes the source to unresolved when any variant
    /// actually selected a path. The expansion itself is external; an empty
    /// variant list (or variants without selected paths) leaves the source
    /// raw. Returns `(source_version_id, template_id, is_new)`.
    #[instrument(name = "version_process_and_store", skip(self, resolved_workflow, variants))]
    pub async fn process_and_store_workflow_versions(
        &self,
        resolved_workflow: &ResolvedWorkflow,
        content_hash: &str,
        source_type: SourceType,
        workflow_template_name: &str,
        user_id: &str,
        variants: &[ExpandedVariant],
    ) -> Result<(String, String, bool)> {
        let (source_version_id, template_id, is_new) = self
            .get_or_create_workflow_version(
                content_hash,
                source_type,
                resolved_workflow,
                workflow_template_name,
                user_id,
            )
            .await?;

        if !is_new {
            debug!(version = %source_version_id, "Source version already exists");
            return Ok((source_version_id, template_id, false));
        }

        let mut has_execution_groups = false;
        for variant in variants {
            if variant.selected_paths.is_empty() {
                debug!("Variant selected no paths, keeping raw version");
                continue;
            }
            has_execution_groups = true;
            let resolved_id = self
                .create_resolved_version(
                    &template_id,
                    &variant.flattened_workflow,
                    &source_version_id,
                    variant.requires.clone(),
                )
                .await?;
            debug!(resolved = %resolved_id, "Created resolved variant");
        }

        if has_execution_groups {
            self.set_version_type(&source_version_id, VersionType::Unresolved)
                .await?;
            info!(version = %source_version_id, "Promoted source version to unresolved");
        }

        Ok((source_version_id, template_id, is_new))
    }

    /// Resolved children of a source version.
    pub async fn get_resolved_children(&self, parent_version_id: &str) -> Result<Vec<WorkflowVersion>> {
        self.db
            .query_typed(
                "SELECT * FROM workflow_versions WHERE parent_workflow_version_id = $parent \
                 AND version_type = 'resolved' ORDER BY created_at ASC",
                vec![("parent".to_string(), json!(parent_version_id))],
            )
            .await
    }

    /// Best version for a capability list: the matching resolved child with
    /// the highest priority sum, else the raw parent. Errors when the parent
    /// is unresolved and nothing matches - such a version is not runnable.
    pub async fn get_version_for_capabilities(
        &self,
        raw_version_id: &str,
        capabilities: &[String],
    ) -> Result<WorkflowVersion> {
        let parent = self
            .get_workflow_version_by_id(raw_version_id)
            .await?
            .ok_or_else(|| anyhow!("Version {} not found", raw_version_id))?;

        let children = self.get_resolved_children(raw_version_id).await?;
        let best = children
            .into_iter()
            .filter(|child| {
                child
                    .requires
                    .iter()
                    .all(|req| capabilities.contains(&req.capability))
            })
            .max_by_key(WorkflowVersion::capability_score);

        if let Some(best) = best {
            return Ok(best);
        }

        if parent.version_type == VersionType::Unresolved {
            return Err(anyhow!(
                "Cannot use unresolved version {} for workflow run",
                parent.workflow_version_id
            ));
        }
        Ok(parent)
    }

    // ------------------------------------------------------------------
    // Cross-template promotion
    // ------------------------------------------------------------------

    /// Copies a source version and its resolved children into another
    /// template, deduplicated by content hash.
    pub async fn copy_version_tree(
        &self,
        source_version_id: &str,
        target_template_id: &str,
    ) -> Result<SyncCounts> {
        let Some(source) = self.get_workflow_version_by_id(source_version_id).await? else {
            return Ok(SyncCounts {
                inserted: 0,
                existing: 0,
            });
        };

        let mut counts = SyncCounts {
            inserted: 0,
            existing: 0,
        };

        let target_source_id = self
            .ensure_copied(&source, target_template_id, None, &mut counts)
            .await?;

        for child in self.get_resolved_children(source_version_id).await? {
            self.ensure_copied(&child, target_template_id, Some(&target_source_id), &mut counts)
                .await?;
        }

        Ok(counts)
    }

    /// Copies every version of a template into another one, preserving
    /// parent links, deduplicated by content hash. Sources first so resolved
    /// children can be re-parented onto the copied sources.
    pub async fn sync_template_versions(
        &self,
        source_template_id: &str,
        target_template_id: &str,
    ) -> Result<SyncCounts> {
        let versions: Vec<WorkflowVersion> = self
            .db
            .query_typed(
                "SELECT * FROM workflow_versions WHERE workflow_template_id = $template \
                 ORDER BY created_at ASC",
                vec![("template".to_string(), json!(source_template_id))],
            )
            .await?;

        let mut counts = SyncCounts {
            inserted: 0,
            existing: 0,
        };
        let mut id_map: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for version in versions
            .iter()
            .filter(|v| v.version_type != VersionType::Resolved)
        {
            let new_id = self
                .ensure_copied(version, target_template_id, None, &mut counts)
                .await?;
            id_map.insert(version.workflow_version_id.clone(), new_id);
        }

        for version in versions
            .iter()
            .filter(|v| v.version_type == VersionType::Resolved)
        {
            let parent_target = version
                .parent_workflow_version_id
                .as_ref()
                .and_then(|p| id_map.get(p))
                .cloned();
            let new_id = self
                .ensure_copied(version, target_template_id, parent_target.as_deref(), &mut counts)
                .await?;
            id_map.insert(version.workflow_version_id.clone(), new_id);
        }

        Ok(counts)
    }

    async fn ensure_copied(
        &self,
        source: &WorkflowVersion,
        target_template_id: &str,
        parent_id: Option<&str>,
        counts: &mut SyncCounts,
    ) -> Result<String> {
        if let Some(existing) = self
            .get_version_by_content_hash(target_template_id, &source.content_hash)
            .await?
        {
            counts.existing += 1;
            return Ok(existing.workflow_version_id);
        }

        let new_id = ids::version_id();
        let mut copied = source.clone();
        copied.workflow_version_id = new_id.clone();
        copied.workflow_template_id = target_template_id.to_string();
        copied.parent_workflow_version_id = parent_id.map(str::to_string);
        self.insert_version(copied).await?;
        counts.inserted += 1;
        Ok(new_id)
    }
}
