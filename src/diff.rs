// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Structured diff between workflow definitions.
//!
//! Used by the start/resume confirmation flow: when submitted content hashes
//! differently from the stored source version, the caller gets this diff and
//! must confirm before the new version is written. Whitespace-only string
//! differences are normalized away so cosmetic edits don't trigger prompts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a single change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Changed,
    Added,
    Removed,
}

/// One changed leaf, addressed in dot/bracket notation
/// (`steps[0].modules[1].inputs.prompt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// The full diff result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDiff {
    pub has_changes: bool,
    /// e.g. "2 changed, 1 added, 0 removed"
    pub summary: String,
    pub changes: Vec<WorkflowChange>,
}

/// Computes the structured diff between two definition trees.
pub fn diff_workflows(old: &Value, new: &Value) -> WorkflowDiff {
    let mut changes = Vec::new();
    diff_values(old, new, String::new(), &mut changes);

    let changed = changes
        .iter()
        .filter(|c| c.change_type == ChangeType::Changed)
        .count();
    let added = changes
        .iter()
        .filter(|c| c.change_type == ChangeType::Added)
        .count();
    let removed = changes
        .iter()
        .filter(|c| c.change_type == ChangeType::Removed)
        .count();

    WorkflowDiff {
        has_changes: !changes.is_empty(),
        summary: format!("{} changed, {} added, {} removed", changed, added, removed),
        changes,
    }
}

fn diff_values(old: &Value, new: &Value, path: String, changes: &mut Vec<WorkflowChange>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child_path = join_key(&path, key);
                match new_map.get(key) {
                    Some(new_value) => diff_values(old_value, new_value, child_path, changes),
                    None => changes.push(WorkflowChange {
                        change_type: ChangeType::Removed,
                        path: child_path,
                        old_value: Some(old_value.clone()),
                        new_value: None,
                    }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    changes.push(WorkflowChange {
                        change_type: ChangeType::Added,
                        path: join_key(&path, key),
                        old_value: None,
                        new_value: Some(new_value.clone()),
                    });
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let common = old_items.len().min(new_items.len());
            for i in 0..common {
                diff_values(&old_items[i], &new_items[i], format!("{}[{}]", path, i), changes);
            }
            for (i, item) in old_items.iter().enumerate().skip(common) {
                changes.push(WorkflowChange {
                    change_type: ChangeType::Removed,
                    path: format!("{}[{}]", path, i),
                    old_value: Some(item.clone()),
                    new_value: None,
                });
            }
            for (i, item) in new_items.iter().enumerate().skip(common) {
                changes.push(WorkflowChange {
                    change_type: ChangeType::Added,
                    path: format!("{}[{}]", path, i),
                    old_value: None,
                    new_value: Some(item.clone()),
                });
            }
        }
        (old, new) => {
            if !leaf_equal(old, new) {
                changes.push(WorkflowChange {
                    change_type: ChangeType::Changed,
                    path,
                    old_value: Some(old.clone()),
                    new_value: Some(new.clone()),
                });
            }
        }
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn leaf_equal(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::String(a), Value::String(b)) => normalize_whitespace(a) == normalize_whitespace(b),
        _ => old == new,
    }
}

/// Strips trailing whitespace per line and outer whitespace.
fn normalize_whitespace(value: &str) -> String {
    value
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
