// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Braid
//!
//! Durable, branchable workflow execution engine for AI-assisted content
//! pipelines. Runs are persisted purely as an event log: position, state and
//! history are derivations, and time travel (retry, jump, recovery) forks
//! branches instead of mutating history.
//!
//! ## Modules
//!
//! - [`db`] - SurrealDB client, schema, repositories, task queue, recovery
//! - [`models`] - runs, events, branches, versions, interactions, tasks
//! - [`engine`] - module traits, registry, execution context, resolver
//! - [`modules`] - built-in executable and interactive modules
//! - [`workflow`] - executor, interaction handling, navigation, sub-actions,
//!   streaming, and the [`WorkflowProcessor`] facade
//! - [`llm`] - provider-agnostic chat client seam
//! - [`state`] - process-wide engine state and stream cancellation
//!
//! ## Example
//!
//! ```rust,ignore
//! use braid::{EngineConfig, EngineState, StartOptions};
//!
//! let state = EngineState::new(EngineConfig::from_env()).await?;
//! let result = state.processor.start_workflow(&version_id, StartOptions {
//!     project_name: "demo".into(),
//!     workflow_template_name: "story".into(),
//!     user_id: "user1".into(),
//!     ..Default::default()
//! }).await?;
//! ```

pub mod config;
pub mod db;
pub mod diff;
pub mod engine;
pub mod error;
pub mod llm;
pub mod models;
pub mod modules;
pub mod state;
pub mod utils;
pub mod workflow;

pub use config::{init_tracing, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use state::EngineState;
pub use workflow::{StartOptions, WorkflowProcessor};
