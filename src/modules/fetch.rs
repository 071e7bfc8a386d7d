// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! `api.fetch` - HTTP requests as a workflow module.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::engine::{ExecutableModule, ExecutionContext, InputField, InputType, ModuleOutputs};

pub struct FetchModule;

const SCHEMA: &[InputField] = &[
    InputField::required("url", InputType::String),
    InputField::optional("method", InputType::String),
    InputField::optional("headers", InputType::Object),
    InputField::optional("body", InputType::Any),
];

#[async_trait]
impl ExecutableModule for FetchModule {
    fn module_id(&self) -> &'static str {
        "api.fetch"
    }

    fn input_schema(&self) -> &'static [InputField] {
        SCHEMA
    }

    async fn execute(
        &self,
        inputs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<ModuleOutputs> {
        let url = inputs
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing url"))?;
        let method = inputs
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        let client = ctx
            .services
            .http
            .clone()
            .unwrap_or_else(reqwest::Client::new);

        debug!(url = %url, method = %method, "Fetching");

        let mut request = match method.as_str() {
            "POST" => client.post(url),
            "PUT" => client.put(url),
            "DELETE" => client.delete(url),
            _ => client.get(url),
        };
        if let Some(Value::Object(headers)) = inputs.get("headers") {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(name, v);
                }
            }
        }
        if let Some(body) = inputs.get("body") {
            request = request.json(body);
        }

        // Abort promptly when the stream is cancelled mid-flight
        let response = tokio::select! {
            result = request.send() => result?,
            _ = ctx.cancel.cancelled() => anyhow::bail!("Fetch cancelled"),
        };

        let status = response.status().as_u16();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(json!({"status": status, "body": body})
            .as_object()
            .unwrap()
            .clone())
    }
}
