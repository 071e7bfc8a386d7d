// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine state shared across transport handlers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::engine::ModuleRegistry;
use crate::llm::LlmClient;
use crate::workflow::WorkflowProcessor;

/// Top-level engine state: one per process, cloned into handlers.
///
/// Per-run cancellation tokens let any handler cancel a stream opened by
/// another; tokens are installed when a stream starts and removed when it
/// ends.
pub struct EngineState {
    pub db: Database,
    pub registry: Arc<ModuleRegistry>,
    pub processor: WorkflowProcessor,
    pub config: EngineConfig,
    streaming_cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl EngineState {
    /// Opens the store, initializes the schema and wires the processor.
    pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let db = Database::open(&config.db_path).await?;
        let registry = Arc::new(ModuleRegistry::with_builtins());
        let processor =
            WorkflowProcessor::with_registry(db.clone(), config.clone(), registry.clone());

        Ok(Self {
            db,
            registry,
            processor,
            config,
            streaming_cancellations: Mutex::new(HashMap::new()),
        })
    }

    /// Adds an LLM client to the processor (builder style, used at startup).
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.processor = self.processor.clone().with_llm(llm);
        self
    }

    /// Registers a cancellation token for a run's active stream, replacing
    /// (and cancelling) any previous one.
    pub async fn register_stream(&self, workflow_run_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut cancellations = self.streaming_cancellations.lock().await;
        if let Some(previous) = cancellations.insert(workflow_run_id.to_string(), token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancels the active stream of a run, if any.
    pub async fn request_cancellation(&self, workflow_run_id: &str) -> bool {
        let cancellations = self.streaming_cancellations.lock().await;
        match cancellations.get(workflow_run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops a run's stream token once the stream ends.
    pub async fn clear_stream(&self, workflow_run_id: &str) {
        self.streaming_cancellations
            .lock()
            .await
            .remove(workflow_run_id);
    }
}
