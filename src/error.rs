// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine error type.
//!
//! Errors local to a single module become an error outcome and halt the run;
//! errors in the engine itself (storage, lookup) propagate to the caller
//! without mutating the run. Messages destined for persistence or clients
//! must pass through [`crate::utils::sanitize_error_message`] first.

use thiserror::Error;

/// Typed engine failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Run, version, template, interaction or module ref missing
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Resolved inputs failed a module's schema check
    #[error("Module '{module_id}' validation failed: {message}")]
    Validation { module_id: String, message: String },

    /// A module's execute raised
    #[error("Module '{module_id}' failed: {message}")]
    ModuleExecution { module_id: String, message: String },

    /// Attempt to execute an unresolved version
    #[error("Cannot use unresolved version {0} for workflow run")]
    Unresolved(String),

    /// No resolved variant matches the supplied capabilities
    #[error("No suitable version found for capabilities: {0:?}")]
    NoRunnableVersion(Vec<String>),

    /// User cancellation; never written to the event log as an error
    #[error("Cancelled")]
    Cancelled,

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Engine result alias.
pub type EngineResult<T> = Result<T, EngineError>;
