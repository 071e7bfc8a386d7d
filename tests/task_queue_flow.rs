// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Task queue flows: worker claim discipline, concurrency limits and queue
//! position reporting under contention.

use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

use braid::db::{Database, TaskQueue};
use braid::models::TaskStatus;

async fn setup() -> (tempfile::TempDir, TaskQueue) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db = Database::open(temp_dir.path().join("db").to_str().unwrap())
        .await
        .expect("DB open failed");
    (temp_dir, db.queue)
}

/// Worker poll loop as external workers implement it: look up the
/// concurrency group, count processing, refuse to claim past the limit.
async fn try_claim_with_limit(
    queue: &TaskQueue,
    task_id: &str,
    worker_id: &str,
    provider: &str,
    limit: i64,
) -> Option<String> {
    let processing = queue.count_processing(provider).await.unwrap();
    if processing as i64 >= limit {
        return None;
    }
    queue
        .claim_task(task_id, worker_id, provider, limit)
        .await
        .unwrap()
        .map(|t| t.task_id)
}

#[tokio::test]
async fn test_concurrency_limit_caps_processing_tasks() {
    let (_tmp, queue) = setup().await;

    let mut task_ids = Vec::new();
    for _ in 0..5 {
        task_ids.push(
            queue
                .enqueue("media", json!({"provider": "X"}), 0, 3)
                .await
                .unwrap(),
        );
    }

    // Two workers sweep the queue; limit for provider X is 2
    let mut claimed = Vec::new();
    for (i, task_id) in task_ids.iter().enumerate() {
        let worker = if i % 2 == 0 { "worker-1" } else { "worker-2" };
        if let Some(id) = try_claim_with_limit(&queue, task_id, worker, "X", 2).await {
            claimed.push(id);
        }
    }
    assert_eq!(claimed.len(), 2, "exactly the limit may process");
    assert_eq!(queue.count_processing("X").await.unwrap(), 2);

    // The other three wait in line with their positions spelled out
    queue.update_queue_positions("X").await.unwrap();
    let queued = queue.get_queued_tasks_by_concurrency("X", 10).await.unwrap();
    assert_eq!(queued.len(), 3);
    for (i, task) in queued.iter().enumerate() {
        assert_eq!(
            task.progress.message,
            format!("Queued (position {} of 3)", i + 1)
        );
    }

    // Completing one frees a slot
    queue
        .complete_task(&claimed[0], json!({"ok": true}), None)
        .await
        .unwrap();
    assert_eq!(queue.count_processing("X").await.unwrap(), 1);
    let next = queue.peek_next_task().await.unwrap().unwrap();
    let reclaimed = try_claim_with_limit(&queue, &next.task_id, "worker-1", "X", 2).await;
    assert!(reclaimed.is_some());
    assert_eq!(queue.count_processing("X").await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_claims_have_single_winner() {
    let (_tmp, queue) = setup().await;
    let task_id = queue
        .enqueue("media", json!({"provider": "X"}), 0, 3)
        .await
        .unwrap();

    let queue = Arc::new(queue);
    let mut handles = Vec::new();
    for i in 0..8 {
        let queue = queue.clone();
        let task_id = task_id.clone();
        handles.push(tokio::spawn(async move {
            queue
                .claim_task(&task_id, &format!("worker-{}", i), "X", 8)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "at most one claim may succeed");

    let task = queue.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_priority_orders_claims_before_age() {
    let (_tmp, queue) = setup().await;
    let low = queue
        .enqueue("media", json!({"provider": "X"}), 1, 3)
        .await
        .unwrap();
    let _mid = queue
        .enqueue("media", json!({"provider": "X"}), 5, 3)
        .await
        .unwrap();
    let high = queue
        .enqueue("media", json!({"provider": "X"}), 9, 3)
        .await
        .unwrap();

    let first = queue.peek_next_task().await.unwrap().unwrap();
    assert_eq!(first.task_id, high);

    queue.claim_task(&high, "w", "X", 10).await.unwrap();
    let second = queue.peek_next_task().await.unwrap().unwrap();
    assert_ne!(second.task_id, low, "higher priority goes first");
}

#[tokio::test]
async fn test_stale_task_recovered_exactly_once() {
    let (_tmp, queue) = setup().await;
    let task_id = queue
        .enqueue("media", json!({"provider": "X"}), 0, 3)
        .await
        .unwrap();
    queue.claim_task(&task_id, "w", "X", 2).await.unwrap();

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(30);
    let first_pass = queue.recover_stale_tasks(cutoff).await.unwrap();
    assert_eq!(first_pass, 1);

    // The task is queued again; a second pass with the same cutoff finds
    // nothing processing and recovers nothing
    let second_pass = queue.recover_stale_tasks(cutoff).await.unwrap();
    assert_eq!(second_pass, 0);

    let task = queue.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.retry_count, 1);
}

#[tokio::test]
async fn test_heartbeat_keeps_task_alive() {
    let (_tmp, queue) = setup().await;
    let task_id = queue
        .enqueue("media", json!({"provider": "X"}), 0, 3)
        .await
        .unwrap();
    queue.claim_task(&task_id, "w", "X", 2).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let before_heartbeat = chrono::Utc::now();
    queue.update_heartbeat(&task_id).await.unwrap();

    // A cutoff older than the fresh heartbeat leaves the task alone
    let recovered = queue.recover_stale_tasks(before_heartbeat).await.unwrap();
    assert_eq!(recovered, 0);
    let task = queue.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert!(task.heartbeat_at.unwrap() >= before_heartbeat);
}
