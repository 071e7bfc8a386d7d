// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! LLM client seam.
//!
//! Concrete provider SDKs live outside the engine; the executor only sees
//! this trait. Implementations must observe the cancellation token inside
//! their streaming loop so in-flight generations can be aborted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A chat completion result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub tokens_input: u64,
    #[serde(default)]
    pub tokens_output: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// LLM client errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM provider error: {0}")]
    Provider(String),
    #[error("LLM call cancelled")]
    Cancelled,
}

/// Provider-agnostic chat client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Runs a completion to the end. Implementations should bail with
    /// [`LlmError::Cancelled`] when the token fires mid-generation.
    async fn complete(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, LlmError>;

    /// Streaming variant: chunks are sent as they arrive, the assembled
    /// response is returned at the end. The default falls back to a single
    /// chunk from `complete`.
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        chunks: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.complete(request, cancel).await?;
        let _ = chunks.send(response.content.clone()).await;
        Ok(response)
    }
}

/// Deterministic offline client: replays canned responses in order, then
/// echoes the last user message. Used by tests and local dry runs.
pub struct ScriptedLlmClient {
    responses: std::sync::Mutex<Vec<String>>,
    /// Requests seen, for assertions on injected conversation history
    requests: std::sync::Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: std::sync::Mutex::new(responses),
            requests: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// All requests the client has served so far.
    pub fn seen_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.requests.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        let content = if responses.is_empty() {
            request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        } else {
            responses.remove(0)
        };

        Ok(LlmResponse {
            tokens_input: request.messages.iter().map(|m| m.content.len() as u64).sum(),
            tokens_output: content.len() as u64,
            content,
            model: request.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_replays_then_echoes() {
        let client = ScriptedLlmClient::new(vec!["first".to_string()]);
        let cancel = CancellationToken::new();

        let request = LlmRequest {
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        };
        let response = client.complete(&request, &cancel).await.unwrap();
        assert_eq!(response.content, "first");

        let response = client.complete(&request, &cancel).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(client.seen_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_client_observes_cancellation() {
        let client = ScriptedLlmClient::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = LlmRequest::default();
        let result = client.complete(&request, &cancel).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }

    #[tokio::test]
    async fn test_default_streaming_sends_single_chunk() {
        let client = ScriptedLlmClient::new(vec!["streamed".to_string()]);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);

        let request = LlmRequest::default();
        let response = client
            .complete_streaming(&request, tx, &cancel)
            .await
            .unwrap();
        assert_eq!(response.content, "streamed");
        assert_eq!(rx.recv().await.unwrap(), "streamed");
    }
}
