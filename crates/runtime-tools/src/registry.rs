// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use runtime_model::{ToolCall, ToolSchema};

use crate::tool::{Tool, ToolOutput};

/// Aggregates the tools available to one agent. Registration happens once at
/// setup time; lookups and execution are read-only afterwards, so a plain
/// `HashMap` behind an `Arc` is sufficient without any interior mutability.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(&self, call: &ToolCall) -> anyhow::Result<ToolOutput> {
        match self.tools.get(&call.function.name) {
            Some(tool) => tool.execute(call).await,
            None => anyhow::bail!("unknown tool: {}", call.function.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, call: &ToolCall) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::ok(call.id.clone(), "done"))
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_error() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "c1".into(),
            call_type: "function".into(),
            function: runtime_model::FunctionCall {
                name: "missing".into(),
                arguments: "{}".into(),
            },
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn registered_tool_is_found_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NoopTool));
        assert!(registry.get("noop").is_some());
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }
}
