// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use runtime_model::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a tool's output should be truncated when it overflows the budget
/// reserved for a single tool result. Dispatching on category (not tool
/// name) keeps truncation independent of any specific tool's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputCategory {
    HeadTail,
    MatchList,
    FileContent,
    #[default]
    Generic,
}

/// Behavioral annotations the runtime uses to decide approval gating and to
/// describe the tool to a user-facing surface. `read_only_hint` is the only
/// field the approval gate inspects; the rest exist for fidelity to the
/// tool-descriptor shape a real toolset exposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(default)]
    pub read_only_hint: bool,
    #[serde(default)]
    pub destructive_hint: bool,
    #[serde(default)]
    pub idempotent_hint: bool,
    #[serde(default)]
    pub open_world_hint: bool,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolOutputPart {
    pub text: Option<String>,
    pub image_data_url: Option<String>,
}

impl ToolOutputPart {
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutputPart {
            text: Some(text.into()),
            image_data_url: None,
        }
    }

    pub fn image(data_url: impl Into<String>) -> Self {
        ToolOutputPart {
            text: None,
            image_data_url: Some(data_url.into()),
        }
    }
}

/// The result of invoking a tool's handler.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolOutput {
            call_id: call_id.into(),
            content: content.into(),
            parts: Vec::new(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolOutput {
            call_id: call_id.into(),
            content: content.into(),
            parts: Vec::new(),
            is_error: true,
        }
    }

    pub fn with_parts(mut self, parts: Vec<ToolOutputPart>) -> Self {
        self.parts = parts;
        self
    }

    pub fn has_images(&self) -> bool {
        self.parts.iter().any(|p| p.image_data_url.is_some())
    }
}

/// An invokable capability an agent can call. Concrete implementations
/// (shell, filesystem, MCP bridges, …) live outside this crate; only the
/// trait boundary and the in-tree test fixtures are defined here.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> &str {
        "general"
    }

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    fn output_schema(&self) -> Option<Value> {
        None
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::default()
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, call: &ToolCall) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::ok(call.id.clone(), call.function.arguments.clone()))
        }
    }

    #[tokio::test]
    async fn tool_executes_and_echoes_arguments() {
        let tool = EchoTool;
        let call = ToolCall {
            id: "c1".into(),
            call_type: "function".into(),
            function: runtime_model::FunctionCall {
                name: "echo".into(),
                arguments: "{\"x\":1}".into(),
            },
        };
        let out = tool.execute(&call).await.unwrap();
        assert_eq!(out.content, "{\"x\":1}");
        assert!(!out.is_error);
    }

    #[test]
    fn default_annotations_are_not_read_only() {
        let annotations = ToolAnnotations::default();
        assert!(!annotations.read_only_hint);
    }
}
