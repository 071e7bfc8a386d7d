// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Addon processor injection.
//!
//! Addons are opaque to the engine: the only contract is that each addon's
//! `inputs` are resolved against current state and the resulting processor
//! is attached to the execution context before `get_interaction_request` is
//! called. What an addon means is the interactive module's business.

use serde_json::{Map, Value};

use crate::engine::resolver::{ParameterResolver, ResolverScope};

/// Ordered list of resolved addon configurations.
#[derive(Debug, Clone, Default)]
pub struct AddonProcessor {
    resolved: Vec<Map<String, Value>>,
}

impl AddonProcessor {
    /// Resolves each addon's `inputs` subtree; all other keys pass through
    /// untouched.
    pub fn from_configs(
        configs: &[Map<String, Value>],
        resolver: &dyn ParameterResolver,
        scope: &ResolverScope<'_>,
    ) -> Self {
        let mut resolved = Vec::with_capacity(configs.len());
        for addon in configs {
            let mut entry = addon.clone();
            if let Some(Value::Object(inputs)) = addon.get("inputs") {
                entry.insert(
                    "inputs".to_string(),
                    Value::Object(resolver.resolve(inputs, scope)),
                );
            }
            resolved.push(entry);
        }
        Self { resolved }
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn configs(&self) -> &[Map<String, Value>] {
        &self.resolved
    }
}
