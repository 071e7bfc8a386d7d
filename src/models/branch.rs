// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Branch model - partial viewports onto a run's event log.
//!
//! A branch never owns its full history; it owns a lineage of ancestors,
//! each with an inclusive cutoff event id. Replaying a branch means taking
//! every ancestor's events up to its cutoff plus all of the branch's own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One lineage entry: an ancestor branch and the last of its events that
/// participates in this viewport. `None` means "all events" and is only
/// ever set on the final (self) entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub branch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutoff_event_id: Option<String>,
}

/// A branch row. Immutable after creation; only new events reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: String,
    pub workflow_run_id: String,
    /// Ordered root-to-self lineage; the last entry is the branch itself
    /// with a `None` cutoff.
    pub lineage: Vec<LineageEntry>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    /// Returns the lineage as `(branch_id, cutoff)` pairs, root first.
    pub fn lineage_pairs(&self) -> Vec<(String, Option<String>)> {
        self.lineage
            .iter()
            .map(|e| (e.branch_id.clone(), e.cutoff_event_id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lineage_pairs_order() {
        let branch = Branch {
            branch_id: "br_c".to_string(),
            workflow_run_id: "wf_1".to_string(),
            lineage: vec![
                LineageEntry {
                    branch_id: "br_a".to_string(),
                    cutoff_event_id: Some("evt_5".to_string()),
                },
                LineageEntry {
                    branch_id: "br_c".to_string(),
                    cutoff_event_id: None,
                },
            ],
            created_at: Utc::now(),
        };
        let pairs = branch.lineage_pairs();
        assert_eq!(pairs[0], ("br_a".to_string(), Some("evt_5".to_string())));
        assert_eq!(pairs[1], ("br_c".to_string(), None));
    }

    #[test]
    fn test_lineage_entry_omits_null_cutoff() {
        let entry = LineageEntry {
            branch_id: "br_x".to_string(),
            cutoff_event_id: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("cutoff_event_id"));
    }
}
