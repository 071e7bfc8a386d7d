// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Streaming entry points.
//!
//! Each stream is a single-subscriber channel fed by a spawned task: the
//! engine work runs on its own task while the generator loop ticks progress
//! at the configured cadence and watches the cancel token. Transport maps
//! each event 1:1 onto an SSE frame. The event log remains the truth; a
//! dropped subscriber loses nothing.

use futures::Stream;
use serde_json::{Map, Value};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::models::{
    InteractionResponseData, RunStatus, SseEvent, SseEventType, WorkflowResponse,
};
use crate::utils::sanitize_error_message;
use crate::workflow::processor::WorkflowProcessor;

/// Adapts a subscriber channel into a `Stream`, the shape SSE transports
/// consume directly.
pub fn event_stream(rx: mpsc::Receiver<SseEvent>) -> impl Stream<Item = SseEvent> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
}

impl WorkflowProcessor {
    /// Streams execution of a run from its current position. A pending
    /// interaction short-circuits to a single `interaction` event.
    pub fn execute_stream(
        &self,
        workflow_run_id: &str,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SseEvent> {
        let (tx, rx) = mpsc::channel(64);
        let processor = self.clone();
        let run_id = workflow_run_id.to_string();

        tokio::spawn(async move {
            let Some(workflow) = processor.db.runs.get_workflow(&run_id).await.ok().flatten()
            else {
                let _ = tx.send(SseEvent::error(&run_id, "Workflow not found")).await;
                return;
            };

            let position = match processor.db.state.get_workflow_position(&run_id, None).await {
                Ok(position) => position,
                Err(e) => {
                    let _ = tx
                        .send(SseEvent::error(&run_id, &sanitize_error_message(&e.to_string())))
                        .await;
                    return;
                }
            };

            // A pending interaction is re-presented, not re-executed
            if position.pending_interaction.is_some() {
                if let Ok(Some(last)) = processor
                    .db
                    .events
                    .get_latest_event(&run_id, crate::models::EventType::InteractionRequested)
                    .await
                {
                    let mut data = last.data.clone();
                    if let Value::Object(map) = &mut data {
                        map.insert("workflow_run_id".to_string(), Value::String(run_id.clone()));
                    }
                    let _ = tx.send(SseEvent::interaction(data)).await;
                    return;
                }
            }

            let _ = tx
                .send(SseEvent::started(
                    &run_id,
                    position.current_step.as_deref(),
                    position.current_module_index,
                ))
                .await;

            let services = processor.build_services(&workflow, None);
            let run_for_task = run_id.clone();
            let processor_for_task = processor.clone();
            let cancel_for_task = cancel.clone();
            let work = async move {
                let workflow_def = processor_for_task
                    .get_workflow_def(&workflow)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Workflow definition not found"))?;
                processor_for_task
                    .executor
                    .execute_from_position(
                        &run_for_task,
                        &workflow_def,
                        &position,
                        &services,
                        cancel_for_task,
                    )
                    .await
            };

            processor.run_with_progress(&run_id, work, cancel, tx).await;
        });
        rx
    }

    /// Streams processing of an interaction response.
    pub fn respond_stream(
        &self,
        workflow_run_id: &str,
        interaction_id: &str,
        response: InteractionResponseData,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SseEvent> {
        let (tx, rx) = mpsc::channel(64);
        let processor = self.clone();
        let run_id = workflow_run_id.to_string();
        let interaction_id = interaction_id.to_string();

        tokio::spawn(async move {
            let _ = tx
                .send(SseEvent::progress(&run_id, 0, "Processing response..."))
                .await;

            let position = processor
                .db
                .state
                .get_workflow_position(&run_id, None)
                .await
                .unwrap_or_default();
            let _ = tx
                .send(SseEvent::started(
                    &run_id,
                    position.current_step.as_deref(),
                    position.current_module_index,
                ))
                .await;

            let processor_for_task = processor.clone();
            let run_for_task = run_id.clone();
            let cancel_for_task = cancel.clone();
            let work = async move {
                processor_for_task
                    .respond(
                        &run_for_task,
                        &interaction_id,
                        &response,
                        None,
                        cancel_for_task,
                    )
                    .await
            };

            processor.run_with_progress(&run_id, work, cancel, tx).await;
        });
        rx
    }

    /// State-watch stream: emits a full snapshot, then added/changed keys
    /// whenever the derived state map moves. Runs until cancelled.
    pub fn state_stream(
        &self,
        workflow_run_id: &str,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SseEvent> {
        let (tx, rx) = mpsc::channel(64);
        let processor = self.clone();
        let run_id = workflow_run_id.to_string();

        tokio::spawn(async move {
            let mut snapshot: Map<String, Value> = match processor
                .db
                .state
                .get_module_outputs(&run_id, None)
                .await
            {
                Ok(state) => state,
                Err(e) => {
                    let _ = tx
                        .send(SseEvent::error(&run_id, &sanitize_error_message(&e.to_string())))
                        .await;
                    return;
                }
            };
            if tx
                .send(SseEvent::state_snapshot(&run_id, &snapshot))
                .await
                .is_err()
            {
                return;
            }

            let mut ticker = tokio::time::interval(processor.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx.send(SseEvent::cancelled(&run_id, "user_cancelled")).await;
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let current = match processor.db.state.get_module_outputs(&run_id, None).await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(error = %e, "State watch query failed");
                        continue;
                    }
                };

                let mut changed = Map::new();
                for (key, value) in &current {
                    if snapshot.get(key) != Some(value) {
                        changed.insert(key.clone(), value.clone());
                    }
                }
                if !changed.is_empty() {
                    if tx
                        .send(SseEvent::state_update(&run_id, changed))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    snapshot = current;
                }
            }
        });
        rx
    }

    /// Drives an engine future while ticking progress events and watching
    /// the cancel token, then maps its response onto terminal events.
    async fn run_with_progress<F>(
        &self,
        workflow_run_id: &str,
        work: F,
        cancel: CancellationToken,
        tx: mpsc::Sender<SseEvent>,
    ) where
        F: std::future::Future<Output = anyhow::Result<WorkflowResponse>> + Send + 'static,
    {
        let start = Instant::now();
        let mut handle = tokio::spawn(work);
        let mut progress_ticker = tokio::time::interval(self.config.progress_interval);
        progress_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; swallow it so progress starts after
        // one interval
        progress_ticker.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut handle => break result,
                _ = cancel.cancelled() => {
                    info!("Stream cancellation requested");
                    handle.abort();
                    let _ = tx.send(SseEvent::cancelled(workflow_run_id, "user_cancelled")).await;
                    return;
                }
                _ = progress_ticker.tick() => {
                    let _ = tx.send(SseEvent::progress(
                        workflow_run_id,
                        start.elapsed().as_millis() as u64,
                        "Processing...",
                    )).await;
                }
            }
        };

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if matches!(e.downcast_ref::<EngineError>(), Some(EngineError::Cancelled)) {
                    let _ = tx
                        .send(SseEvent::cancelled(workflow_run_id, "execution_cancelled"))
                        .await;
                } else {
                    let _ = tx
                        .send(SseEvent::error(
                            workflow_run_id,
                            &sanitize_error_message(&e.to_string()),
                        ))
                        .await;
                }
                return;
            }
            Err(join_error) => {
                let _ = tx
                    .send(SseEvent::error(
                        workflow_run_id,
                        &sanitize_error_message(&join_error.to_string()),
                    ))
                    .await;
                return;
            }
        };

        match response.status {
            RunStatus::AwaitingInput => {
                let data = response
                    .interaction_request
                    .unwrap_or_else(|| serde_json::json!({}));
                let _ = tx.send(SseEvent::interaction(data)).await;
            }
            RunStatus::Completed => {
                let _ = tx
                    .send(SseEvent::complete(
                        workflow_run_id,
                        response.result.unwrap_or_default(),
                    ))
                    .await;
            }
            RunStatus::Error => {
                let _ = tx
                    .send(SseEvent::error(
                        workflow_run_id,
                        response.error.as_deref().unwrap_or("Unknown error"),
                    ))
                    .await;
            }
            other => {
                let _ = tx
                    .send(SseEvent::new(
                        SseEventType::Progress,
                        serde_json::json!({
                            "workflow_run_id": workflow_run_id,
                            "message": format!("Status: {}", other),
                        }),
                    ))
                    .await;
            }
        }
    }
}
