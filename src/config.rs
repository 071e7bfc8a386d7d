// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.
//!
//! One injected object, constructed at startup; no module-level singletons.

use std::time::Duration;

/// Runtime configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the embedded store
    pub db_path: String,
    /// Cadence of the streaming generator's cancellation checks
    pub poll_interval: Duration,
    /// Cadence of `progress` events while synchronous work runs
    pub progress_interval: Duration,
    /// Age beyond which a processing task's heartbeat counts as stale;
    /// several multiples of the worker heartbeat interval
    pub stale_task_cutoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "./braid_data".to_string(),
            poll_interval: Duration::from_millis(50),
            progress_interval: Duration::from_millis(100),
            stale_task_cutoff: Duration::from_secs(90),
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the environment: `BRAID_DB_PATH`,
    /// `POLL_INTERVAL`, `PROGRESS_INTERVAL` (seconds, fractional),
    /// `STALE_TASK_CUTOFF` (seconds).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("BRAID_DB_PATH") {
            config.db_path = path;
        }
        if let Some(seconds) = read_secs("POLL_INTERVAL") {
            config.poll_interval = seconds;
        }
        if let Some(seconds) = read_secs("PROGRESS_INTERVAL") {
            config.progress_interval = seconds;
        }
        if let Some(seconds) = read_secs("STALE_TASK_CUTOFF") {
            config.stale_task_cutoff = seconds;
        }
        config
    }
}

fn read_secs(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Initializes structured logging: filter from `RUST_LOG`, JSON output when
/// `BRAID_LOG_JSON=1`. Call once from the hosting binary.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("BRAID_LOG_JSON").map(|v| v == "1").unwrap_or(false) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
