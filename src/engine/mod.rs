// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Module system: capability traits, registry, execution context and
//! parameter resolution.

pub mod addons;
pub mod context;
pub mod module;
pub mod registry;
pub mod resolver;

pub use addons::AddonProcessor;
pub use context::{ExecutionContext, ExecutionServices, SubActionContext};
pub use module::{
    validate_inputs, ExecutableModule, InputField, InputType, InteractiveModule, ModuleOutputs,
};
pub use registry::{ModuleRegistry, RegisteredModule};
pub use resolver::{ParameterResolver, ResolverScope, TemplateResolver};
