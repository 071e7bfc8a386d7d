// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! `data.transform` - shapes resolved inputs into outputs.
//!
//! The resolver has already substituted state references, so passing the
//! inputs through is the whole job: pick values out of state, rename them
//! via `outputs_to_state`, or seed constants into a workflow.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::engine::{ExecutableModule, ExecutionContext, ModuleOutputs};

pub struct TransformModule;

#[async_trait]
impl ExecutableModule for TransformModule {
    fn module_id(&self) -> &'static str {
        "data.transform"
    }

    async fn execute(
        &self,
        inputs: &Map<String, Value>,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ModuleOutputs> {
        let mut outputs = inputs.clone();
        outputs.remove("resolver_schema");
        Ok(outputs)
    }
}
