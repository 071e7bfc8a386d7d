// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! `api.llm_call` - chat completion through the injected client.
//!
//! Retry plumbing happens here: the navigator leaves the prior attempts
//! under `_retry_conversation_history` (and the latest feedback under
//! `_retry_feedback`) in the state snapshot, and this module replays them
//! before the current prompt so the model sees the full exchange.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::engine::{ExecutableModule, ExecutionContext, InputField, InputType, ModuleOutputs};
use crate::llm::{ChatMessage, LlmRequest};

/// State key the navigator uses for injected conversation history.
pub const RETRY_HISTORY_KEY: &str = "_retry_conversation_history";
/// State key the navigator uses for the latest retry feedback.
pub const RETRY_FEEDBACK_KEY: &str = "_retry_feedback";

pub struct LlmCallModule;

const SCHEMA: &[InputField] = &[
    InputField::required("prompt", InputType::String),
    InputField::optional("system_prompt", InputType::String),
    InputField::optional("model", InputType::String),
    InputField::optional("temperature", InputType::Number),
    InputField::optional("max_tokens", InputType::Number),
];

#[async_trait]
impl ExecutableModule for LlmCallModule {
    fn module_id(&self) -> &'static str {
        "api.llm_call"
    }

    fn input_schema(&self) -> &'static [InputField] {
        SCHEMA
    }

    async fn execute(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<ModuleOutputs> {
        let client = ctx
            .services
            .llm
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No LLM client configured"))?;

        let prompt = inputs
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing prompt"))?;

        let mut messages = Vec::new();
        if let Some(system) = inputs.get("system_prompt").and_then(Value::as_str) {
            messages.push(ChatMessage::system(system));
        }

        // Prior attempts and feedback, injected by a retry
        if let Some(history) = ctx.state.get(RETRY_HISTORY_KEY) {
            let turns: Vec<ChatMessage> = serde_json::from_value(history.clone())?;
            info!(turns = turns.len(), "Replaying retry conversation history");
            messages.extend(turns);
        }
        messages.push(ChatMessage::user(prompt));

        // Per-run ai_config supplies the default model
        let model = inputs
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                ctx.services
                    .ai_config
                    .get("model")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        let request = LlmRequest {
            model,
            messages,
            temperature: inputs.get("temperature").and_then(Value::as_f64),
            max_tokens: inputs
                .get("max_tokens")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
        };

        debug!(message_count = request.messages.len(), "Calling LLM");
        let response = client
            .complete(&request, &ctx.cancel)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(json!({
            "response": response.content,
            "model": response.model,
            "tokens_input": response.tokens_input,
            "tokens_output": response.tokens_output,
        })
        .as_object()
        .unwrap()
        .clone())
    }
}
