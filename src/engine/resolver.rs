// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parameter resolution seam.
//!
//! The executor resolves a module's raw `inputs` tree against the current
//! state snapshot before validation. The full expression engine is an
//! external collaborator behind [`ParameterResolver`]; the bundled
//! [`TemplateResolver`] covers `{{ path }}` substitution with `$step.` and
//! `$config.` scopes, which is what the built-in modules and tests use.
//! Resolution is pure: it never mutates state.

use serde_json::{Map, Value};

use crate::models::StepDef;
use crate::utils::get_nested_value;

/// Lookup scope for one resolution pass.
pub struct ResolverScope<'a> {
    /// Flat state map (module outputs + state-mapped keys)
    pub state: &'a Map<String, Value>,
    /// Current step config, for `$step.` references
    pub step: Option<&'a StepDef>,
    /// Workflow-level config, for `$config.` references
    pub config: &'a Map<String, Value>,
}

/// Pluggable expression resolver.
pub trait ParameterResolver: Send + Sync {
    /// Resolves a raw inputs tree against the scope, returning a new tree.
    fn resolve(&self, inputs: &Map<String, Value>, scope: &ResolverScope<'_>) -> Map<String, Value>;
}

/// Built-in moustache-style resolver.
///
/// A string that is exactly one `{{ path }}` expression resolves to the raw
/// value (arrays and numbers survive untouched); mixed strings interpolate
/// the display form. Unknown paths resolve to null / empty.
pub struct TemplateResolver;

impl TemplateResolver {
    fn lookup(path: &str, scope: &ResolverScope<'_>) -> Option<Value> {
        let path = path.trim();
        if let Some(step_path) = path.strip_prefix("$step.") {
            let step = scope.step?;
            let step_value = serde_json::to_value(step).ok()?;
            return get_nested_value(&step_value, step_path).cloned();
        }
        if let Some(config_path) = path.strip_prefix("$config.") {
            return get_nested_value(&Value::Object(scope.config.clone()), config_path).cloned();
        }
        get_nested_value(&Value::Object(scope.state.clone()), path).cloned()
    }

    fn display(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn resolve_value(value: &Value, scope: &ResolverScope<'_>) -> Value {
        match value {
            Value::String(text) => Self::resolve_string(text, scope),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, inner) in map {
                    out.insert(key.clone(), Self::resolve_value(inner, scope));
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| Self::resolve_value(v, scope)).collect())
            }
            other => other.clone(),
        }
    }

    fn resolve_string(text: &str, scope: &ResolverScope<'_>) -> Value {
        let trimmed = text.trim();
        // Whole-string expression keeps the raw value type
        if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
            let inner = &trimmed[2..trimmed.len() - 2];
            if !inner.contains("{{") {
                return Self::lookup(inner, scope).unwrap_or(Value::Null);
            }
        }

        // Interpolation path
        let mut result = String::new();
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let path = &after[..end];
                    if let Some(value) = Self::lookup(path, scope) {
                        result.push_str(&Self::display(&value));
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);
        Value::String(result)
    }
}

impl ParameterResolver for TemplateResolver {
    fn resolve(&self, inputs: &Map<String, Value>, scope: &ResolverScope<'_>) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in inputs {
            out.insert(key.clone(), Self::resolve_value(value, scope));
        }
        out
    }
}
