// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Workflow engine core: executor, interaction handling, navigation,
//! sub-actions, streaming and the processor facade.

pub mod executor;
pub mod interaction;
pub mod navigation;
pub mod processor;
pub mod streaming;
pub mod sub_action;

pub use executor::WorkflowExecutor;
pub use interaction::InteractionHandler;
pub use navigation::NavigationHandler;
pub use processor::{StartOptions, WorkflowProcessor};
pub use streaming::event_stream;
pub use sub_action::SubActionHandler;
