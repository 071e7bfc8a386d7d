// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod branch;
pub mod definition;
pub mod event;
pub mod interaction;
pub mod position;
pub mod response;
pub mod run;
pub mod streaming;
pub mod task;
pub mod version;

pub use branch::{Branch, LineageEntry};
pub use definition::{
    MappingMode, ModuleDef, ModuleRef, ResolvedWorkflow, ResultMapping, RetryMode, RetryOption,
    RetryableConfig, StepDef, SubActionAction, SubActionDef, SubActionType,
};
pub use event::{EventType, WorkflowEvent};
pub use interaction::{
    CompletedInteraction, InteractionOption, InteractionRequest, InteractionResponseData,
    InteractionType,
};
pub use position::{RetryContext, WorkflowPosition};
pub use response::{StartResult, WorkflowProgress, WorkflowResponse};
pub use run::{RunStatus, VersionHistoryEntry, WorkflowRun};
pub use streaming::{SseEvent, SseEventType};
pub use task::{QueueTask, TaskError, TaskProgress, TaskStatus};
pub use version::{
    CapabilityRequirement, ExpandedVariant, SourceType, TemplateScope, TemplateVisibility,
    VersionType, WorkflowTemplate, WorkflowVersion, GLOBAL_TEMPLATE_USER_ID,
};
