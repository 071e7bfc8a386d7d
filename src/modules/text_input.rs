// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! `user.text_input` - free-form text interaction.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::db::ids;
use crate::engine::{ExecutionContext, InputField, InputType, InteractiveModule, ModuleOutputs};
use crate::models::{InteractionRequest, InteractionResponseData, InteractionType};

pub struct TextInputModule;

const SCHEMA: &[InputField] = &[
    InputField::required("prompt", InputType::String),
    InputField::optional("placeholder", InputType::String),
    InputField::optional("default", InputType::String),
];

#[async_trait]
impl InteractiveModule for TextInputModule {
    fn module_id(&self) -> &'static str {
        "user.text_input"
    }

    fn input_schema(&self) -> &'static [InputField] {
        SCHEMA
    }

    async fn get_interaction_request(
        &self,
        inputs: &Map<String, Value>,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<InteractionRequest> {
        let mut display_data = Map::new();
        for key in ["prompt", "placeholder", "default"] {
            if let Some(value) = inputs.get(key) {
                display_data.insert(key.to_string(), value.clone());
            }
        }

        Ok(InteractionRequest {
            interaction_id: ids::interaction_id(),
            interaction_type: InteractionType::TextInput,
            display_data,
            options: Vec::new(),
            multi_select: false,
            allow_custom: true,
            groups: Vec::new(),
        })
    }

    async fn execute_with_response(
        &self,
        inputs: &Map<String, Value>,
        _ctx: &ExecutionContext,
        response: &InteractionResponseData,
    ) -> anyhow::Result<ModuleOutputs> {
        let text = response
            .custom_value
            .clone()
            .or_else(|| {
                response
                    .value
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| {
                inputs
                    .get("default")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Ok(json!({"text": text}).as_object().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::ExecutionServices;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_text_input_round_trip() {
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

        let inputs = json!({"prompt": "name the project", "default": "untitled"})
            .as_object()
            .unwrap()
            .clone();
        let request = TextInputModule
            .get_interaction_request(&inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(request.interaction_type, InteractionType::TextInput);
        assert!(request.allow_custom);
        assert_eq!(request.display_data["prompt"], "name the project");

        let response: InteractionResponseData =
            serde_json::from_value(json!({"custom_value": "braid"})).unwrap();
        let outputs = TextInputModule
            .execute_with_response(&inputs, &ctx, &response)
            .await
            .unwrap();
        assert_eq!(outputs["text"], "braid");

        // Empty response falls back to the configured default
        let response = InteractionResponseData::default();
        let outputs = TextInputModule
            .execute_with_response(&inputs, &ctx, &response)
            .await
            .unwrap();
        assert_eq!(outputs["text"], "untitled");
    }
}
