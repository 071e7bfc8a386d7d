// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! `media.generate` - media generation review interaction.
//!
//! The interaction presents the generation request and accumulated results;
//! actual generation happens out of process. The module's self sub-action
//! enqueues a task for the media worker pool, polls the row, forwards
//! worker progress to the stream, and returns the completed result as child
//! state. Provider SDKs never appear here.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::db::ids;
use crate::engine::{
    ExecutionContext, InputField, InputType, InteractiveModule, ModuleOutputs, SubActionContext,
};
use crate::models::{InteractionRequest, InteractionResponseData, InteractionType, TaskStatus};

/// Queue actor handling media generation tasks.
pub const MEDIA_ACTOR: &str = "media";

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct MediaGenerateModule;

const SCHEMA: &[InputField] = &[
    InputField::required("provider", InputType::String),
    InputField::required("prompt", InputType::String),
    InputField::optional("count", InputType::Number),
    InputField::optional("priority", InputType::Number),
];

#[async_trait]
impl InteractiveModule for MediaGenerateModule {
    fn module_id(&self) -> &'static str {
        "media.generate"
    }

    fn input_schema(&self) -> &'static [InputField] {
        SCHEMA
    }

    async fn get_interaction_request(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<InteractionRequest> {
        let mut display_data = Map::new();
        for key in ["provider", "prompt", "count"] {
            if let Some(value) = inputs.get(key) {
                display_data.insert(key.to_string(), value.clone());
            }
        }
        // Previously generated content survives retries and sub-actions
        if let Some(generations) = ctx.state.get("generations") {
            display_data.insert("generations".to_string(), generations.clone());
        }

        Ok(InteractionRequest {
            interaction_id: ids::interaction_id(),
            interaction_type: InteractionType::MediaGeneration,
            display_data,
            options: Vec::new(),
            multi_select: false,
            allow_custom: false,
            groups: Vec::new(),
        })
    }

    async fn execute_with_response(
        &self,
        _inputs: &Map<String, Value>,
        _ctx: &ExecutionContext,
        response: &InteractionResponseData,
    ) -> anyhow::Result<ModuleOutputs> {
        let mut outputs = Map::new();
        if let Some(content_id) = &response.selected_content_id {
            outputs.insert("selected_content_id".to_string(), json!(content_id));
        }
        outputs.insert("generations".to_string(), json!(response.generations));
        Ok(outputs)
    }

    /// Enqueues a generation task and follows it to completion.
    async fn run_sub_action(
        &self,
        ctx: SubActionContext,
        progress: mpsc::Sender<Value>,
    ) -> anyhow::Result<Map<String, Value>> {
        let queue = ctx.db.queue.clone();

        let provider = ctx
            .params
            .get("provider")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let priority = ctx.params.get("priority").and_then(Value::as_i64).unwrap_or(0);

        let payload = json!({
            "provider": provider,
            "params": ctx.params,
            "workflow_run_id": ctx.workflow_run_id,
            "interaction_id": ctx.interaction_id,
            "execution_id": ctx.execution_id,
        });
        let task_id = queue.enqueue(MEDIA_ACTOR, payload, priority, 3).await?;
        info!(task = %task_id, provider = %provider, "Enqueued media generation task");

        let mut last_message = String::new();
        loop {
            if ctx.cancel.is_cancelled() {
                anyhow::bail!("Media generation cancelled");
            }

            let task = queue
                .get_task(&task_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Task {} disappeared", task_id))?;

            if task.progress.message != last_message {
                last_message = task.progress.message.clone();
                let _ = progress
                    .send(json!({
                        "message": task.progress.message,
                        "elapsed_ms": task.progress.elapsed_ms,
                        "task_id": task_id,
                    }))
                    .await;
            }

            match task.status {
                TaskStatus::Completed => {
                    debug!(task = %task_id, "Media task completed");
                    let mut child_state = Map::new();
                    child_state.insert(
                        "generations".to_string(),
                        json!([task.result.clone().unwrap_or(Value::Null)]),
                    );
                    child_state.insert("media_task_id".to_string(), json!(task_id));
                    if let Some(result) = task.result {
                        child_state.insert("result".to_string(), result);
                    }
                    return Ok(child_state);
                }
                TaskStatus::Failed => {
                    let message = task
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    anyhow::bail!("Media generation failed: {}", message);
                }
                TaskStatus::Queued | TaskStatus::Processing => {
                    tokio::time::sleep(TASK_POLL_INTERVAL).await;
                }
            }
        }
    }
}
