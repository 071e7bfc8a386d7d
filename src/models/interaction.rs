// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interaction request/response models.
//!
//! Interactive modules suspend the run by emitting an `InteractionRequest`;
//! the client later answers with an `InteractionResponseData`. The request
//! payload persisted in the event log additionally embeds the resolved
//! module inputs so responders never re-resolve.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of interaction presented to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Pick one or more options
    Selection,
    /// Free-form text
    TextInput,
    /// Structured form fields
    Form,
    /// Offer a produced artifact for download
    FileDownload,
    /// Media generation review (drives queue-backed sub-actions)
    MediaGeneration,
}

/// One selectable option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionOption {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque client metadata; `is_retry: true` marks retry shortcuts
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl InteractionOption {
    /// True when selecting this option should trigger the retry path.
    pub fn is_retry(&self) -> bool {
        self.id == "retry"
            || self
                .metadata
                .get("is_retry")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

/// A request for human input, produced by an interactive module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub interaction_id: String,
    pub interaction_type: InteractionType,
    /// Display payload rendered by the client (title, prompt, media, ...)
    #[serde(default)]
    pub display_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<InteractionOption>,
    /// Allow selecting more than one option
    #[serde(default)]
    pub multi_select: bool,
    /// Allow a free-form value alongside (or instead of) options
    #[serde(default)]
    pub allow_custom: bool,
    /// Optional option groups for grouped retry flows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Map<String, Value>>,
}

impl InteractionRequest {
    /// Serializes the request into the event payload shape, embedding the
    /// resolved inputs, module id and optional resolver schema so later
    /// components can reuse the resolved view without re-resolving.
    pub fn to_event_data(
        &self,
        resolved_inputs: &Map<String, Value>,
        module_id: &str,
        resolver_schema: Option<&Value>,
    ) -> Value {
        let mut data = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()));
        if let Value::Object(map) = &mut data {
            map.insert(
                "_resolved_inputs".to_string(),
                Value::Object(resolved_inputs.clone()),
            );
            map.insert("module_id".to_string(), Value::String(module_id.to_string()));
            if let Some(schema) = resolver_schema {
                map.insert("resolver_schema".to_string(), schema.clone());
            }
        }
        data
    }
}

/// A client's answer to a pending interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionResponseData {
    /// Raw scalar value for simple prompts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_indices: Vec<usize>,
    /// Echoes of the selected options (id/label/metadata)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_options: Vec<InteractionOption>,
    /// Free-form value; with no selected options this means retry feedback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_value: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    /// Explicit retry request from the client UI
    #[serde(default)]
    pub retry_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_feedback: Option<String>,
    /// Explicit jump-back request from the client UI
    #[serde(default)]
    pub jump_back_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_back_target: Option<String>,
    /// Structured form answers
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub form_data: Map<String, Value>,
    /// Media review: chosen generated content id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_content_id: Option<String>,
    /// Media review: accumulated generation descriptors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generations: Vec<Value>,
}

/// A completed request/response pair, ordered by response time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedInteraction {
    pub interaction_id: String,
    pub request: Value,
    pub response: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
}
