// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers: error sanitizing, dotted-path access, deep merge.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    // Bearer tokens, sk-style keys, key=value secrets
    Regex::new(r#"(?i)(api[_-]?key|authorization|bearer|token|secret)[\s:=]+[^\s"',;]+"#).unwrap()
});

static SK_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bsk-[A-Za-z0-9_-]{8,}").unwrap());

static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(/[\w.\-]+){3,}").unwrap());

/// Scrubs secrets and local paths from an error message before it is
/// persisted or surfaced to a client.
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = API_KEY_RE.replace_all(message, "$1=[redacted]");
    let sanitized = SK_KEY_RE.replace_all(&sanitized, "[redacted]");
    let sanitized = PATH_RE.replace_all(&sanitized, "[path]");
    sanitized.into_owned()
}

/// Reads a value from a nested object by dotted path ("a.b.c").
pub fn get_nested_value<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Writes a value into a nested object by dotted path, creating
/// intermediate objects as needed. Non-object intermediates are replaced.
pub fn set_nested_value(data: &mut Map<String, Value>, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    let mut current = data;
    for key in &keys[..keys.len() - 1] {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().unwrap();
    }
    current.insert(keys[keys.len() - 1].to_string(), value);
}

/// Deep-merges `override_map` into `base`; override wins on conflicts,
/// objects merge recursively.
pub fn deep_merge(base: &Map<String, Value>, override_map: &Map<String, Value>) -> Map<String, Value> {
    let mut result = base.clone();
    for (key, value) in override_map {
        match (result.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                result.insert(key.clone(), Value::Object(deep_merge(existing, incoming)));
            }
            _ => {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

/// Substitutes the `{step_number}` placeholder in a step display name.
pub fn render_step_name(name: &str, step_index: usize) -> String {
    name.replace("{step_number}", &(step_index + 1).to_string())
}
