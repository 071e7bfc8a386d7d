// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Identifier generation.
//!
//! All ids are prefixed uuid7 hex. uuid7 embeds a millisecond timestamp in
//! its most significant bits, so ids of one kind sort lexically in creation
//! order - the event log's total order relies on exactly this property.

use uuid::Uuid;

fn uuid7_hex() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Time-sortable event id. Single-writer-per-run discipline guarantees no
/// two events of a run are minted concurrently.
pub fn event_id() -> String {
    format!("evt_{}", uuid7_hex())
}

pub fn run_id() -> String {
    format!("wf_{}", uuid7_hex())
}

/// Hidden sub-action child runs get their own prefix so listings and logs
/// can tell them apart at a glance.
pub fn sub_run_id() -> String {
    format!("wf_sub_{}", uuid7_hex())
}

pub fn branch_id() -> String {
    format!("br_{}", uuid7_hex())
}

pub fn template_id() -> String {
    format!("tpl_{}", uuid7_hex())
}

pub fn version_id() -> String {
    format!("ver_{}", uuid7_hex())
}

pub fn task_id() -> String {
    format!("tq_{}", uuid7_hex())
}

pub fn interaction_id() -> String {
    format!("int_{}", uuid7_hex())
}

/// Sub-action execution id, prefixed with the sub-action id for log grep-ability.
pub fn execution_id(sub_action_id: &str) -> String {
    format!("{}_{}", sub_action_id, uuid7_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_sort_in_creation_order() {
        let mut ids = Vec::new();
        for _ in 0..50 {
            ids.push(event_id());
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "uuid7 event ids must be lexically ordered");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = event_id();
        let b = event_id();
        assert_ne!(a, b);
        assert!(a.starts_with("evt_"));
        assert!(run_id().starts_with("wf_"));
        assert!(sub_run_id().starts_with("wf_sub_"));
        assert!(branch_id().starts_with("br_"));
        assert!(task_id().starts_with("tq_"));
    }
}
