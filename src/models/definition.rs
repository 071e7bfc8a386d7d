// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resolved workflow definition tree.
//!
//! A resolved definition is the runnable form of a workflow: an ordered list
//! of steps, each an ordered list of modules. Definitions are immutable once
//! stored in a version; the executor only ever reads them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full definition tree stored inside a workflow version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedWorkflow {
    /// Template name as declared by the workflow author
    #[serde(default)]
    pub workflow_id: String,
    /// Workflow-level configuration made available to the resolver
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

/// One ordered step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    pub step_id: String,
    /// Display name; may embed a `{step_number}` placeholder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub modules: Vec<ModuleDef>,
}

/// One module entry within a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Dotted registry id, e.g. `api.llm_call`
    pub module_id: String,
    /// Instance name; falls back to the module id when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw inputs, resolved against state before execution
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Dotted output path → flat state key; a path may feed several keys
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs_to_state: Map<String, Value>,
    /// Retry/jump options surfaced by interactive modules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<RetryableConfig>,
    /// In-interaction operations available while this module is pending
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_actions: Vec<SubActionDef>,
    /// Opaque addon configurations, resolved and injected before
    /// `get_interaction_request`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<Map<String, Value>>,
}

impl ModuleDef {
    /// Instance name used in events: explicit `name`, else the module id.
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.module_id)
    }

    /// Short name: explicit `name`, else the last segment of the module id.
    /// Jump targets accept either form.
    pub fn short_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.module_id.rsplit('.').next().unwrap_or(&self.module_id))
    }
}

/// Retry/jump configuration of an interactive module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryableConfig {
    #[serde(default)]
    pub options: Vec<RetryOption>,
}

/// Navigation mode of a retryable option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    Retry,
    Jump,
}

/// One retry/jump option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOption {
    pub mode: RetryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackConfig>,
}

/// Feedback defaults for a retry option.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default)]
    pub default_message: String,
}

/// A sub-action attached to an interactive module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubActionDef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading_label: Option<String>,
    #[serde(default)]
    pub actions: Vec<SubActionAction>,
    #[serde(default)]
    pub result_mapping: Vec<ResultMapping>,
    /// When present and `params.feedback` is supplied, the parent state is
    /// augmented with `{state_key: feedback}` before dispatch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<SubActionFeedback>,
}

/// Feedback routing for a sub-action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubActionFeedback {
    pub state_key: String,
}

/// Kind of sub-action dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubActionType {
    /// Clone referenced non-interactive modules into a hidden child run
    TargetSubAction,
    /// Delegate to the module's own `run_sub_action`
    SelfSubAction,
}

/// One action item of a sub-action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubActionAction {
    #[serde(rename = "type")]
    pub action_type: SubActionType,
    /// Module to clone the config from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<ModuleRef>,
    /// Inline fields merged over the ref'd config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs_to_state: Map<String, Value>,
    /// Last-wins deep-merged overrides
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub overrides: Map<String, Value>,
    /// Static params for self sub-actions
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// Reference to a module elsewhere in the same workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRef {
    pub step_id: String,
    pub module_name: String,
}

/// How a mapped value lands in the parent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMode {
    Replace,
    Merge,
}

impl Default for MappingMode {
    fn default() -> Self {
        Self::Replace
    }
}

/// One result mapping of a sub-action: child state path → parent state path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMapping {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub mode: MappingMode,
}

impl ResolvedWorkflow {
    /// Finds a step by id.
    pub fn find_step(&self, step_id: &str) -> Option<(usize, &StepDef)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, s)| s.step_id == step_id)
    }

    /// Finds the first module whose effective name matches, anywhere in the
    /// workflow. Returns (step_id, module_index).
    pub fn find_module(&self, module_name: &str) -> Option<(&str, usize)> {
        for step in &self.steps {
            for (i, module) in step.modules.iter().enumerate() {
                if module.effective_name() == module_name {
                    return Some((step.step_id.as_str(), i));
                }
            }
        }
        None
    }

    /// Finds a module index within a step, accepting either the effective
    /// name or the short name.
    pub fn find_module_in_step(&self, step_id: &str, module_name: &str) -> Option<usize> {
        let (_, step) = self.find_step(step_id)?;
        step.modules
            .iter()
            .position(|m| m.effective_name() == module_name || m.short_name() == module_name)
    }

    /// Looks up a module config by step id and effective name.
    pub fn module_config(&self, step_id: &str, module_name: &str) -> Option<&ModuleDef> {
        let (_, step) = self.find_step(step_id)?;
        step.modules
            .iter()
            .find(|m| m.effective_name() == module_name)
    }
}
