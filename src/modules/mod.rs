// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Built-in workflow modules.

pub mod fetch;
pub mod llm_call;
pub mod media_generate;
pub mod select;
pub mod text_input;
pub mod transform;

pub use fetch::FetchModule;
pub use llm_call::{LlmCallModule, RETRY_FEEDBACK_KEY, RETRY_HISTORY_KEY};
pub use media_generate::{MediaGenerateModule, MEDIA_ACTOR};
pub use select::SelectModule;
pub use text_input::TextInputModule;
pub use transform::TransformModule;

use std::sync::Arc;

use crate::engine::ModuleRegistry;

/// Registers every built-in module.
pub fn register_builtins(registry: &mut ModuleRegistry) {
    registry.register_executable(Arc::new(TransformModule));
    registry.register_executable(Arc::new(FetchModule));
    registry.register_executable(Arc::new(LlmCallModule));
    registry.register_interactive(Arc::new(SelectModule));
    registry.register_interactive(Arc::new(TextInputModule));
    registry.register_interactive(Arc::new(MediaGenerateModule));
}
