// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! SurrealQL schema for the engine's collections.
//!
//! Tables are SCHEMALESS: event payloads, lineage entries and definition
//! trees are arbitrary JSON owned by the application models. Status fields
//! still carry ASSERT constraints, and every index required by the query
//! paths is defined here. Timestamps are RFC3339 strings, which order
//! lexically; event ids are uuid7-based and order lexically too.

pub const SCHEMA_SQL: &str = r#"
-- Namespace and database
DEFINE NAMESPACE IF NOT EXISTS braid;
USE NS braid;
DEFINE DATABASE IF NOT EXISTS engine;
USE DB engine;

-- Table: workflow_runs
DEFINE TABLE OVERWRITE workflow_runs SCHEMALESS;
DEFINE FIELD OVERWRITE status ON workflow_runs TYPE string
    ASSERT $value IN ['created', 'processing', 'awaiting_input', 'completed', 'error'];
DEFINE INDEX OVERWRITE run_id_idx ON workflow_runs FIELDS workflow_run_id UNIQUE;
DEFINE INDEX OVERWRITE run_owner_idx ON workflow_runs FIELDS user_id, workflow_template_name, project_name;

-- Table: events (append-only; no update path exists in the code)
DEFINE TABLE OVERWRITE events SCHEMALESS;
DEFINE INDEX OVERWRITE event_id_idx ON events FIELDS event_id UNIQUE;
DEFINE INDEX OVERWRITE event_run_idx ON events FIELDS workflow_run_id, event_id;
DEFINE INDEX OVERWRITE event_run_type_branch_idx ON events FIELDS workflow_run_id, event_type, branch_id;

-- Table: branches (immutable after creation)
DEFINE TABLE OVERWRITE branches SCHEMALESS;
DEFINE INDEX OVERWRITE branch_id_idx ON branches FIELDS branch_id UNIQUE;
DEFINE INDEX OVERWRITE branch_run_idx ON branches FIELDS workflow_run_id;

-- Table: workflow_templates
DEFINE TABLE OVERWRITE workflow_templates SCHEMALESS;
DEFINE FIELD OVERWRITE scope ON workflow_templates TYPE string
    ASSERT $value IN ['user', 'global'];
DEFINE FIELD OVERWRITE visibility ON workflow_templates TYPE string
    ASSERT $value IN ['visible', 'hidden', 'public'];
DEFINE INDEX OVERWRITE template_id_idx ON workflow_templates FIELDS workflow_template_id UNIQUE;
DEFINE INDEX OVERWRITE template_name_idx ON workflow_templates FIELDS workflow_template_name, user_id;

-- Table: workflow_versions (immutable definition snapshots)
DEFINE TABLE OVERWRITE workflow_versions SCHEMALESS;
DEFINE FIELD OVERWRITE version_type ON workflow_versions TYPE string
    ASSERT $value IN ['raw', 'unresolved', 'resolved'];
DEFINE INDEX OVERWRITE version_id_idx ON workflow_versions FIELDS workflow_version_id UNIQUE;
DEFINE INDEX OVERWRITE version_hash_idx ON workflow_versions FIELDS workflow_template_id, content_hash;
DEFINE INDEX OVERWRITE version_parent_idx ON workflow_versions FIELDS parent_workflow_version_id;

-- Table: workflow_run_version_history
DEFINE TABLE OVERWRITE workflow_run_version_history SCHEMALESS;
DEFINE INDEX OVERWRITE version_history_run_idx ON workflow_run_version_history FIELDS workflow_run_id, created_at;

-- Table: task_queue
DEFINE TABLE OVERWRITE task_queue SCHEMALESS;
DEFINE FIELD OVERWRITE status ON task_queue TYPE string
    ASSERT $value IN ['queued', 'processing', 'completed', 'failed'];
DEFINE INDEX OVERWRITE task_id_idx ON task_queue FIELDS task_id UNIQUE;
DEFINE INDEX OVERWRITE poll_tasks_idx ON task_queue FIELDS status, concurrency_identifier, priority, created_at;
DEFINE INDEX OVERWRITE stale_tasks_idx ON task_queue FIELDS status, heartbeat_at;
DEFINE INDEX OVERWRITE workflow_tasks_idx ON task_queue FIELDS payload.workflow_run_id, created_at;
DEFINE INDEX OVERWRITE interaction_tasks_idx ON task_queue FIELDS payload.interaction_id, created_at;
"#;
