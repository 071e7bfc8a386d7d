// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Task queue - persisted FIFO+priority queue for background workers.
//!
//! Used by both sides of the fence: the engine enqueues work (notably media
//! generation) and queries status; worker processes poll, claim, heartbeat
//! and complete. The claim is a single conditional update, so at most one
//! worker ever wins a task. Concurrency limits are enforced by workers: they
//! count processing tasks for an identifier and refuse to claim past the
//! limit.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::db::client::DBClient;
use crate::db::ids;
use crate::models::{QueueTask, TaskError, TaskProgress, TaskStatus};

/// Database-backed task queue operations.
#[derive(Clone)]
pub struct TaskQueue {
    db: Arc<DBClient>,
}

impl TaskQueue {
    pub fn new(db: Arc<DBClient>) -> Self {
        Self { db }
    }

    /// Adds a task to the queue. Higher priority is claimed first; ties go
    /// to the oldest.
    #[instrument(name = "queue_enqueue", skip(self, payload), fields(actor = %actor))]
    pub async fn enqueue(
        &self,
        actor: &str,
        payload: Value,
        priority: i64,
        max_retries: i64,
    ) -> Result<String> {
        let task_id = ids::task_id();
        let task = QueueTask {
            task_id: task_id.clone(),
            actor: actor.to_string(),
            status: TaskStatus::Queued,
            priority,
            concurrency_identifier: None,
            concurrency_limit: None,
            payload,
            result: None,
            response: None,
            error: None,
            progress: TaskProgress::queued(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            heartbeat_at: None,
            retry_count: 0,
            max_retries,
        };
        self.db.create("task_queue", task).await?;
        info!(task = %task_id, "Enqueued task");
        Ok(task_id)
    }

    /// Next queued task without claiming it: highest priority, oldest first.
    pub async fn peek_next_task(&self) -> Result<Option<QueueTask>> {
        let mut rows: Vec<QueueTask> = self
            .db
            .query_typed(
                "SELECT * FROM task_queue WHERE status = 'queued' \
                 ORDER BY priority DESC, created_at ASC LIMIT 1",
                vec![],
            )
            .await?;
        Ok(rows.pop())
    }

    /// Count of processing tasks under a concurrency identifier.
    pub async fn count_processing(&self, concurrency_identifier: &str) -> Result<usize> {
        let rows = self
            .db
            .query_json(
                "SELECT count() AS total FROM task_queue WHERE status = 'processing' \
                 AND concurrency_identifier = $cid GROUP ALL",
                vec![("cid".to_string(), json!(concurrency_identifier))],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    /// Atomically claims a task: succeeds only when the row is still queued.
    /// Losers of the race get `None`.
    #[instrument(name = "queue_claim", skip(self), fields(task = %task_id, worker = %worker_id))]
    pub async fn claim_task(
        &self,
        task_id: &str,
        worker_id: &str,
        concurrency_identifier: &str,
        concurrency_limit: i64,
    ) -> Result<Option<QueueTask>> {
        let mut rows: Vec<QueueTask> = self
            .db
            .query_typed(
                "UPDATE task_queue SET status = 'processing', worker_id = $worker, \
                 concurrency_identifier = $cid, concurrency_limit = $limit, \
                 started_at = $now, heartbeat_at = $now, \
                 progress.message = 'Processing', progress.updated_at = $now \
                 WHERE task_id = $task AND status = 'queued' RETURN AFTER",
                vec![
                    ("worker".to_string(), json!(worker_id)),
                    ("cid".to_string(), json!(concurrency_identifier)),
                    ("limit".to_string(), json!(concurrency_limit)),
                    ("now".to_string(), json!(Utc::now())),
                    ("task".to_string(), json!(task_id)),
                ],
            )
            .await?;

        let claimed = rows.pop();
        if claimed.is_some() {
            info!("Claimed task");
        }
        Ok(claimed)
    }

    pub async fn update_progress(&self, task_id: &str, elapsed_ms: u64, message: &str) -> Result<()> {
        self.db
            .execute(
                "UPDATE task_queue SET progress.elapsed_ms = $elapsed, progress.message = $message, \
                 progress.updated_at = $now WHERE task_id = $task",
                vec![
                    ("elapsed".to_string(), json!(elapsed_ms)),
                    ("message".to_string(), json!(message)),
                    ("now".to_string(), json!(Utc::now())),
                    ("task".to_string(), json!(task_id)),
                ],
            )
            .await
    }

    pub async fn update_heartbeat(&self, task_id: &str) -> Result<()> {
        self.db
            .execute(
                "UPDATE task_queue SET heartbeat_at = $now WHERE task_id = $task",
                vec![
                    ("now".to_string(), json!(Utc::now())),
                    ("task".to_string(), json!(task_id)),
                ],
            )
            .await
    }

    /// Marks a task completed with its picked result and, optionally, the
    /// raw provider response.
    pub async fn complete_task(
        &self,
        task_id: &str,
        result: Value,
        response: Option<Value>,
    ) -> Result<()> {
        self.db
            .execute(
                "UPDATE task_queue SET status = 'completed', result = $result, response = $response, \
                 completed_at = $now, progress.message = 'Completed', progress.updated_at = $now \
                 WHERE task_id = $task",
                vec![
                    ("result".to_string(), result),
                    ("response".to_string(), response.unwrap_or(Value::Null)),
                    ("now".to_string(), json!(Utc::now())),
                    ("task".to_string(), json!(task_id)),
                ],
            )
            .await?;
        info!(task = %task_id, "Completed task");
        Ok(())
    }

    pub async fn fail_task(
        &self,
        task_id: &str,
        error_type: &str,
        message: &str,
        details: Value,
        stack_trace: &str,
    ) -> Result<()> {
        let error = TaskError {
            error_type: error_type.to_string(),
            message: message.to_string(),
            details,
            stack_trace: stack_trace.to_string(),
        };
        self.db
            .execute(
                "UPDATE task_queue SET status = 'failed', error = $error, completed_at = $now, \
                 progress.message = $progress_message, progress.updated_at = $now \
                 WHERE task_id = $task",
                vec![
                    ("error".to_string(), serde_json::to_value(error)?),
                    ("progress_message".to_string(), json!(format!("Failed: {}", message))),
                    ("now".to_string(), json!(Utc::now())),
                    ("task".to_string(), json!(task_id)),
                ],
            )
            .await?;
        warn!(task = %task_id, message = %message, "Failed task");
        Ok(())
    }

    /// Rewinds stale processing tasks: requeued while retries remain, failed
    /// with `MaxRetriesExceeded` once they are exhausted. Returns the number
    /// of tasks requeued.
    #[instrument(name = "queue_recover_stale", skip(self))]
    pub async fn recover_stale_tasks(&self, stale_cutoff: DateTime<Utc>) -> Result<usize> {
        let stale: Vec<QueueTask> = self
            .db
            .query_typed(
                "SELECT * FROM task_queue WHERE status = 'processing' AND heartbeat_at < $cutoff",
                vec![("cutoff".to_string(), json!(stale_cutoff))],
            )
            .await?;

        let mut recovered = 0;
        for task in stale {
            if task.retry_count < task.max_retries {
                self.db
                    .execute(
                        "UPDATE task_queue SET status = 'queued', worker_id = NONE, \
                         heartbeat_at = NONE, concurrency_identifier = NONE, \
                         retry_count = retry_count + 1, \
                         progress.message = $message, progress.updated_at = $now \
                         WHERE task_id = $task",
                        vec![
                            (
                                "message".to_string(),
                                json!(format!("Retrying (attempt {})", task.retry_count + 2)),
                            ),
                            ("now".to_string(), json!(Utc::now())),
                            ("task".to_string(), json!(task.task_id)),
                        ],
                    )
                    .await?;
                warn!(task = %task.task_id, "Reset stale task for retry");
                recovered += 1;
            } else {
                self.fail_task(
                    &task.task_id,
                    "MaxRetriesExceeded",
                    &format!("Task failed after {} retries", task.max_retries),
                    json!({}),
                    "",
                )
                .await?;
            }
        }
        Ok(recovered)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<QueueTask>> {
        let mut rows: Vec<QueueTask> = self
            .db
            .query_typed(
                "SELECT * FROM task_queue WHERE task_id = $task LIMIT 1",
                vec![("task".to_string(), json!(task_id))],
            )
            .await?;
        Ok(rows.pop())
    }

    pub async fn get_tasks_for_workflow(
        &self,
        workflow_run_id: &str,
        limit: usize,
    ) -> Result<Vec<QueueTask>> {
        self.db
            .query_typed(
                &format!(
                    "SELECT * FROM task_queue WHERE payload.workflow_run_id = $run \
                     ORDER BY created_at DESC LIMIT {}",
                    limit
                ),
                vec![("run".to_string(), json!(workflow_run_id))],
            )
            .await
    }

    pub async fn get_tasks_for_interaction(
        &self,
        interaction_id: &str,
        limit: usize,
    ) -> Result<Vec<QueueTask>> {
        self.db
            .query_typed(
                &format!(
                    "SELECT * FROM task_queue WHERE payload.interaction_id = $interaction \
                     ORDER BY created_at DESC LIMIT {}",
                    limit
                ),
                vec![("interaction".to_string(), json!(interaction_id))],
            )
            .await
    }

    /// Queued tasks for a provider identifier, in claim order.
    pub async fn get_queued_tasks_by_concurrency(
        &self,
        concurrency_identifier: &str,
        limit: usize,
    ) -> Result<Vec<QueueTask>> {
        self.db
            .query_typed(
                &format!(
                    "SELECT * FROM task_queue WHERE status = 'queued' \
                     AND payload.provider = $cid \
                     ORDER BY priority DESC, created_at ASC LIMIT {}",
                    limit
                ),
                vec![("cid".to_string(), json!(concurrency_identifier))],
            )
            .await
    }

    /// Rewrites progress messages of queued tasks to "Queued (position i of
    /// N)" in deterministic claim order. Called by workers when a provider
    /// is at capacity.
    pub async fn update_queue_positions(&self, concurrency_identifier: &str) -> Result<()> {
        let queued = self
            .get_queued_tasks_by_concurrency(concurrency_identifier, 10_000)
            .await?;
        if queued.is_empty() {
            return Ok(());
        }

        let total = queued.len();
        info!(
            total,
            provider = concurrency_identifier,
            "Updating queue positions"
        );
        for (position, task) in queued.iter().enumerate() {
            let message = format!("Queued (position {} of {})", position + 1, total);
            self.db
                .execute(
                    "UPDATE task_queue SET progress.message = $message, progress.updated_at = $now \
                     WHERE task_id = $task",
                    vec![
                        ("message".to_string(), json!(message)),
                        ("now".to_string(), json!(Utc::now())),
                        ("task".to_string(), json!(task.task_id)),
                    ],
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, TaskQueue) {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let db = DBClient::new(temp_dir.path().join("db").to_str().unwrap())
            .await
            .expect("DB creation failed");
        db.initialize_schema().await.expect("Schema init failed");
        (temp_dir, TaskQueue::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_enqueue_and_peek_respects_priority() {
        let (_tmp, queue) = setup().await;

        queue
            .enqueue("media", json!({"provider": "X"}), 0, 3)
            .await
            .unwrap();
        let high = queue
            .enqueue("media", json!({"provider": "X"}), 5, 3)
            .await
            .unwrap();

        let next = queue.peek_next_task().await.unwrap().unwrap();
        assert_eq!(next.task_id, high);
        assert_eq!(next.status, TaskStatus::Queued);
        assert_eq!(next.progress.message, "Queued");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (_tmp, queue) = setup().await;
        let task_id = queue
            .enqueue("media", json!({"provider": "X"}), 0, 3)
            .await
            .unwrap();

        let first = queue.claim_task(&task_id, "worker-1", "X", 2).await.unwrap();
        assert!(first.is_some());
        let claimed = first.unwrap();
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
        assert!(claimed.heartbeat_at.is_some());

        let second = queue.claim_task(&task_id, "worker-2", "X", 2).await.unwrap();
        assert!(second.is_none(), "second claim must lose");
    }

    #[tokio::test]
    async fn test_complete_and_fail_are_terminal() {
        let (_tmp, queue) = setup().await;
        let a = queue.enqueue("media", json!({}), 0, 3).await.unwrap();
        let b = queue.enqueue("media", json!({}), 0, 3).await.unwrap();

        queue.claim_task(&a, "w", "X", 2).await.unwrap();
        queue
            .complete_task(&a, json!({"urls": ["u"]}), Some(json!({"raw": true})))
            .await
            .unwrap();
        let task = queue.get_task(&a).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.result.unwrap()["urls"][0], "u");

        queue.claim_task(&b, "w", "X", 2).await.unwrap();
        queue
            .fail_task(&b, "ProviderError", "boom", json!({}), "")
            .await
            .unwrap();
        let task = queue.get_task(&b).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().error_type, "ProviderError");

        // A completed task can no longer be claimed
        let reclaim = queue.claim_task(&a, "w2", "X", 2).await.unwrap();
        assert!(reclaim.is_none());
    }

    #[tokio::test]
    async fn test_stale_recovery_requeues_then_fails() {
        let (_tmp, queue) = setup().await;
        let task_id = queue.enqueue("media", json!({}), 0, 1).await.unwrap();
        queue.claim_task(&task_id, "w", "X", 2).await.unwrap();

        // Everything heartbeated before this future cutoff is stale
        let cutoff = Utc::now() + chrono::Duration::seconds(60);

        let recovered = queue.recover_stale_tasks(cutoff).await.unwrap();
        assert_eq!(recovered, 1);
        let task = queue.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 1);
        assert!(task.worker_id.is_none());
        assert!(task.progress.message.starts_with("Retrying"));

        // Claim again; with max_retries = 1 the next stale pass fails it
        queue.claim_task(&task_id, "w", "X", 2).await.unwrap();
        let recovered = queue.recover_stale_tasks(cutoff).await.unwrap();
        assert_eq!(recovered, 0);
        let task = queue.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().error_type, "MaxRetriesExceeded");
    }

    #[tokio::test]
    async fn test_queue_positions_in_claim_order() {
        let (_tmp, queue) = setup().await;
        let first = queue
            .enqueue("media", json!({"provider": "X"}), 0, 3)
            .await
            .unwrap();
        let second = queue
            .enqueue("media", json!({"provider": "X"}), 0, 3)
            .await
            .unwrap();
        let urgent = queue
            .enqueue("media", json!({"provider": "X"}), 9, 3)
            .await
            .unwrap();
        // Other providers are untouched
        let other = queue
            .enqueue("media", json!({"provider": "Y"}), 0, 3)
            .await
            .unwrap();

        queue.update_queue_positions("X").await.unwrap();

        let task = queue.get_task(&urgent).await.unwrap().unwrap();
        assert_eq!(task.progress.message, "Queued (position 1 of 3)");
        let task = queue.get_task(&first).await.unwrap().unwrap();
        assert_eq!(task.progress.message, "Queued (position 2 of 3)");
        let task = queue.get_task(&second).await.unwrap().unwrap();
        assert_eq!(task.progress.message, "Queued (position 3 of 3)");
        let task = queue.get_task(&other).await.unwrap().unwrap();
        assert_eq!(task.progress.message, "Queued");
    }

    #[tokio::test]
    async fn test_count_processing_by_identifier() {
        let (_tmp, queue) = setup().await;
        let a = queue
            .enqueue("media", json!({"provider": "X"}), 0, 3)
            .await
            .unwrap();
        let b = queue
            .enqueue("media", json!({"provider": "X"}), 0, 3)
            .await
            .unwrap();

        assert_eq!(queue.count_processing("X").await.unwrap(), 0);
        queue.claim_task(&a, "w1", "X", 2).await.unwrap();
        queue.claim_task(&b, "w2", "X", 2).await.unwrap();
        assert_eq!(queue.count_processing("X").await.unwrap(), 2);
        assert_eq!(queue.count_processing("Y").await.unwrap(), 0);
    }
}
