// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Module capability traits.
//!
//! A module is the smallest unit of work. The executor dispatches on the
//! runtime tag kept by the registry: executable modules run to completion,
//! interactive modules produce a request and are re-invoked with the
//! response. Interactive modules may additionally drive their own
//! sub-action.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::engine::context::{ExecutionContext, SubActionContext};
use crate::models::{InteractionRequest, InteractionResponseData};

/// Declared type of a module input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    String,
    Number,
    Bool,
    Array,
    Object,
    Any,
}

/// One entry of a module's input schema.
#[derive(Debug, Clone, Copy)]
pub struct InputField {
    pub name: &'static str,
    pub field_type: InputType,
    pub required: bool,
}

impl InputField {
    pub const fn required(name: &'static str, field_type: InputType) -> Self {
        Self {
            name,
            field_type,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, field_type: InputType) -> Self {
        Self {
            name,
            field_type,
            required: false,
        }
    }
}

/// Validates resolved inputs against a declared schema.
pub fn validate_inputs(schema: &[InputField], inputs: &Map<String, Value>) -> Result<(), String> {
    for field in schema {
        match inputs.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(format!("Missing required input '{}'", field.name));
                }
            }
            Some(value) => {
                let ok = match field.field_type {
                    InputType::String => value.is_string(),
                    InputType::Number => value.is_number(),
                    InputType::Bool => value.is_boolean(),
                    InputType::Array => value.is_array(),
                    InputType::Object => value.is_object(),
                    InputType::Any => true,
                };
                if !ok {
                    return Err(format!(
                        "Input '{}' has wrong type, expected {:?}",
                        field.name, field.field_type
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Module outputs: a flat JSON object, later projected through
/// `outputs_to_state`.
pub type ModuleOutputs = Map<String, Value>;

/// A non-interactive module. `execute` may perform I/O and run long; it must
/// observe `ctx.cancel` where it can.
#[async_trait]
pub trait ExecutableModule: Send + Sync {
    fn module_id(&self) -> &'static str;

    fn input_schema(&self) -> &'static [InputField] {
        &[]
    }

    async fn execute(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<ModuleOutputs>;
}

/// An interactive module: suspends the run with a request and resumes with
/// the client's response.
#[async_trait]
pub trait InteractiveModule: Send + Sync {
    fn module_id(&self) -> &'static str;

    fn input_schema(&self) -> &'static [InputField] {
        &[]
    }

    /// Builds the request presented to the client. Addon processors, when
    /// configured, are already attached to `ctx` at this point.
    async fn get_interaction_request(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<InteractionRequest>;

    /// Re-invoked with the client's response; returns the module outputs.
    /// `retry_requested` / `jump_back_requested` keys in the outputs are
    /// consumed by the interaction handler, never by the executor.
    async fn execute_with_response(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
        response: &InteractionResponseData,
    ) -> anyhow::Result<ModuleOutputs>;

    /// Self-driven sub-action: emits progress payloads through `progress`
    /// and returns the child state. Default: unsupported.
    async fn run_sub_action(
        &self,
        _ctx: SubActionContext,
        _progress: mpsc::Sender<Value>,
    ) -> anyhow::Result<Map<String, Value>> {
        anyhow::bail!("Module '{}' does not implement run_sub_action", self.module_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &[InputField] = &[
        InputField::required("prompt", InputType::String),
        InputField::optional("count", InputType::Number),
    ];

    #[test]
    fn test_validate_accepts_valid_inputs() {
        let inputs = json!({"prompt": "hello", "count": 2})
            .as_object()
            .unwrap()
            .clone();
        assert!(validate_inputs(SCHEMA, &inputs).is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let inputs = json!({"count": 2}).as_object().unwrap().clone();
        let err = validate_inputs(SCHEMA, &inputs).unwrap_err();
        assert!(err.contains("prompt"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let inputs = json!({"prompt": 7}).as_object().unwrap().clone();
        let err = validate_inputs(SCHEMA, &inputs).unwrap_err();
        assert!(err.contains("wrong type"));
    }

    #[test]
    fn test_validate_optional_may_be_absent_or_null() {
        let inputs = json!({"prompt": "p", "count": null})
            .as_object()
            .unwrap()
            .clone();
        assert!(validate_inputs(SCHEMA, &inputs).is_ok());
    }
}
