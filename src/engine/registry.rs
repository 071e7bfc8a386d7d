// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Centralized registry for module discovery and validation.
//!
//! Maps dotted module ids to implementations. The stored variant is the
//! runtime tag the executor dispatches on: executable modules run straight
//! through, interactive ones suspend the run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::engine::module::{validate_inputs, ExecutableModule, InputField, InteractiveModule};

/// A registered module implementation.
#[derive(Clone)]
pub enum RegisteredModule {
    Executable(Arc<dyn ExecutableModule>),
    Interactive(Arc<dyn InteractiveModule>),
}

impl RegisteredModule {
    pub fn module_id(&self) -> &'static str {
        match self {
            Self::Executable(m) => m.module_id(),
            Self::Interactive(m) => m.module_id(),
        }
    }

    pub fn input_schema(&self) -> &'static [InputField] {
        match self {
            Self::Executable(m) => m.input_schema(),
            Self::Interactive(m) => m.input_schema(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive(_))
    }

    /// Validates resolved inputs against the module's declared schema.
    pub fn validate_inputs(&self, inputs: &Map<String, Value>) -> Result<(), String> {
        validate_inputs(self.input_schema(), inputs)
    }
}

/// Registry of all available modules, built at startup.
pub struct ModuleRegistry {
    modules: HashMap<&'static str, RegisteredModule>,
}

impl ModuleRegistry {
    /// Empty registry; callers register implementations explicitly.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Registry with every built-in module registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::modules::register_builtins(&mut registry);
        registry
    }

    pub fn register_executable(&mut self, module: Arc<dyn ExecutableModule>) {
        self.modules
            .insert(module.module_id(), RegisteredModule::Executable(module));
    }

    pub fn register_interactive(&mut self, module: Arc<dyn InteractiveModule>) {
        self.modules
            .insert(module.module_id(), RegisteredModule::Interactive(module));
    }

    pub fn has_module(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    pub fn get(&self, module_id: &str) -> Option<&RegisteredModule> {
        self.modules.get(module_id)
    }

    pub fn available_modules(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.modules.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Looks up a module id, listing known ids on failure.
    pub fn validate(&self, module_id: &str) -> Result<&RegisteredModule, String> {
        self.modules.get(module_id).ok_or_else(|| {
            format!(
                "Unknown module: '{}'. Available modules: {:?}",
                module_id,
                self.available_modules()
            )
        })
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
