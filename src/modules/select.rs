// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! `user.select` - option selection interaction.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::db::ids;
use crate::engine::{ExecutionContext, InputField, InputType, InteractiveModule, ModuleOutputs};
use crate::models::{
    InteractionOption, InteractionRequest, InteractionResponseData, InteractionType, RetryMode,
};

pub struct SelectModule;

const SCHEMA: &[InputField] = &[
    InputField::required("prompt", InputType::String),
    InputField::required("options", InputType::Array),
    InputField::optional("title", InputType::String),
    InputField::optional("multi_select", InputType::Bool),
    InputField::optional("allow_custom", InputType::Bool),
];

fn parse_option(index: usize, value: &Value) -> InteractionOption {
    match value {
        Value::String(label) => InteractionOption {
            id: label.clone(),
            label: label.clone(),
            description: None,
            metadata: Map::new(),
        },
        Value::Object(map) => InteractionOption {
            id: map
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| index.to_string()),
            label: map
                .get("label")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| index.to_string()),
            description: map
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            metadata: map
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        },
        other => InteractionOption {
            id: index.to_string(),
            label: other.to_string(),
            description: None,
            metadata: Map::new(),
        },
    }
}

#[async_trait]
impl InteractiveModule for SelectModule {
    fn module_id(&self) -> &'static str {
        "user.select"
    }

    fn input_schema(&self) -> &'static [InputField] {
        SCHEMA
    }

    async fn get_interaction_request(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<InteractionRequest> {
        let mut options: Vec<InteractionOption> = inputs
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| parse_option(i, v))
                    .collect()
            })
            .unwrap_or_default();

        // Surface configured retry shortcuts alongside the real options
        if let Some(retryable) = &ctx.retryable {
            for opt in &retryable.options {
                if opt.mode == RetryMode::Retry {
                    let mut metadata = Map::new();
                    metadata.insert("is_retry".to_string(), json!(true));
                    options.push(InteractionOption {
                        id: opt.id.clone().unwrap_or_else(|| "retry".to_string()),
                        label: "Try again".to_string(),
                        description: None,
                        metadata,
                    });
                }
            }
        }

        let mut display_data = Map::new();
        display_data.insert(
            "prompt".to_string(),
            inputs.get("prompt").cloned().unwrap_or(Value::Null),
        );
        if let Some(title) = inputs.get("title") {
            display_data.insert("title".to_string(), title.clone());
        }

        Ok(InteractionRequest {
            interaction_id: ids::interaction_id(),
            interaction_type: InteractionType::Selection,
            display_data,
            options,
            multi_select: inputs
                .get("multi_select")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            allow_custom: inputs
                .get("allow_custom")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            groups: Vec::new(),
        })
    }

    async fn execute_with_response(
        &self,
        _inputs: &Map<String, Value>,
        _ctx: &ExecutionContext,
        response: &InteractionResponseData,
    ) -> anyhow::Result<ModuleOutputs> {
        let selected_ids: Vec<String> = response
            .selected_options
            .iter()
            .map(|o| o.id.clone())
            .collect();

        let selected = selected_ids
            .first()
            .cloned()
            .map(Value::String)
            .or_else(|| response.value.clone())
            .or_else(|| response.custom_value.clone().map(Value::String))
            .unwrap_or(Value::Null);

        let mut outputs = Map::new();
        outputs.insert("selected".to_string(), selected);
        outputs.insert("selected_options".to_string(), json!(selected_ids));
        if let Some(custom) = &response.custom_value {
            outputs.insert("custom_value".to_string(), json!(custom));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::{ExecutionContext, ExecutionServices};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    async fn ctx() -> (tempfile::TempDir, ExecutionContext) {
        let temp_dir = tempdir().unwrap();
        let db = Database::open(temp_dir.path().join("db").to_str().unwrap())
            .await
            .unwrap();
        let ctx = ExecutionContext::new(
            "wf_1",
            db,
            Map::new(),
            ExecutionServices::default(),
            Map::new(),
            CancellationToken::new(),
        );
        (temp_dir, ctx)
    }

    #[tokio::test]
    async fn test_request_from_string_options() {
        let (_tmp, ctx) = ctx().await;
        let inputs = json!({"prompt": "pick one", "options": ["a", "b"]})
            .as_object()
            .unwrap()
            .clone();

        let request = SelectModule
            .get_interaction_request(&inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(request.interaction_type, InteractionType::Selection);
        assert_eq!(request.options.len(), 2);
        assert_eq!(request.options[1].id, "b");
        assert!(request.interaction_id.starts_with("int_"));
    }

    #[tokio::test]
    async fn test_retryable_adds_retry_option() {
        let (_tmp, mut ctx) = ctx().await;
        ctx.retryable = Some(
            serde_json::from_value(json!({
                "options": [{"mode": "retry", "id": "redo", "target_module": "draft"}]
            }))
            .unwrap(),
        );
        let inputs = json!({"prompt": "p", "options": ["a"]})
            .as_object()
            .unwrap()
            .clone();

        let request = SelectModule
            .get_interaction_request(&inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(request.options.len(), 2);
        let retry = &request.options[1];
        assert_eq!(retry.id, "redo");
        assert!(retry.is_retry());
    }

    #[tokio::test]
    async fn test_response_outputs_selected_id() {
        let (_tmp, ctx) = ctx().await;
        let response: InteractionResponseData = serde_json::from_value(json!({
            "selected_options": [{"id": "b", "label": "b"}]
        }))
        .unwrap();

        let outputs = SelectModule
            .execute_with_response(&Map::new(), &ctx, &response)
            .await
            .unwrap();
        assert_eq!(outputs["selected"], "b");
        assert_eq!(outputs["selected_options"], json!(["b"]));
    }

    #[tokio::test]
    async fn test_response_falls_back_to_custom_value() {
        let (_tmp, ctx) = ctx().await;
        let response: InteractionResponseData =
            serde_json::from_value(json!({"custom_value": "my own"})).unwrap();

        let outputs = SelectModule
            .execute_with_response(&Map::new(), &ctx, &response)
            .await
            .unwrap();
        assert_eq!(outputs["selected"], "my own");
        assert_eq!(outputs["custom_value"], "my own");
    }
}
