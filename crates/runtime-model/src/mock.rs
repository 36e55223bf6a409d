// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::Mutex;

use crate::catalog::ModelCostDescriptor;
use crate::provider::{CloneOptions, ModelProvider, ResponseStream};
use crate::types::{CompletionRequest, ResponseEvent, Usage};

/// A model provider whose responses are a pre-scripted sequence of turns,
/// each turn itself a sequence of `ResponseEvent`s. Every call to `complete`
/// pops the next scripted turn; once scripts are exhausted it yields a
/// single error event so tests fail loudly instead of hanging.
pub struct ScriptedMockProvider {
    name: String,
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    last_request: Arc<Mutex<Option<CompletionRequest>>>,
    cost: Option<ModelCostDescriptor>,
    context_limit: Option<usize>,
}

impl ScriptedMockProvider {
    pub fn new(name: impl Into<String>, scripts: Vec<Vec<ResponseEvent>>) -> Self {
        ScriptedMockProvider {
            name: name.into(),
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            cost: None,
            context_limit: None,
        }
    }

    /// Single-turn helper: always responds with `reply` as a text delta then
    /// stops, repeated for every call (reusable across many turns).
    pub fn always_text(name: impl Into<String>, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        let script = vec![ResponseEvent::TextDelta(reply), ResponseEvent::Done];
        ScriptedMockProvider::new(name, vec![script])
    }

    /// Two-round helper: first round emits a single tool call, second round
    /// emits closing text. Useful for approval-gate and delegation tests.
    pub fn tool_then_text(
        name: impl Into<String>,
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        let tool_round = vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: Some(tool_id.into()),
                name: Some(tool_name.into()),
                arguments: Some(arguments_json.into()),
            },
            ResponseEvent::Done,
        ];
        let text_round = vec![ResponseEvent::TextDelta(final_text.into()), ResponseEvent::Done];
        ScriptedMockProvider::new(name, vec![tool_round, text_round])
    }

    pub fn with_cost(mut self, cost: ModelCostDescriptor) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    pub async fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().await = Some(request);
        let mut scripts = self.scripts.lock().await;
        let events = if scripts.is_empty() {
            vec![ResponseEvent::Error("[no more scripts]".to_string())]
        } else {
            scripts.remove(0)
        };
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    fn context_limit(&self) -> Option<usize> {
        self.context_limit
    }

    fn cost_descriptor(&self) -> Option<ModelCostDescriptor> {
        self.cost
    }

    fn clone_with_options(&self, _options: CloneOptions) -> Box<dyn ModelProvider> {
        Box::new(ScriptedMockProvider {
            name: self.name.clone(),
            scripts: Arc::new(Mutex::new(Vec::new())),
            last_request: Arc::new(Mutex::new(None)),
            cost: self.cost,
            context_limit: self.context_limit,
        })
    }
}

/// Simplest possible provider: echoes the last user message with a fixed
/// prefix and constant usage. Handy for smoke tests that don't care about
/// scripted turns.
pub struct EchoMockProvider {
    name: String,
}

impl EchoMockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        EchoMockProvider { name: name.into() }
    }
}

#[async_trait]
impl ModelProvider for EchoMockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == crate::types::Role::User)
            .map(|m| m.as_text())
            .unwrap_or_default();
        let events = vec![
            ResponseEvent::TextDelta(format!("MOCK: {last_user}")),
            ResponseEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
                ..Default::default()
            }),
            ResponseEvent::Done,
        ];
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    fn clone_with_options(&self, _options: CloneOptions) -> Box<dyn ModelProvider> {
        Box::new(EchoMockProvider::new(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn echo_provider_prefixes_last_user_message() {
        let provider = EchoMockProvider::new("echo-1");
        let request = CompletionRequest {
            messages: vec![crate::types::Message::user("hello")],
            ..Default::default()
        };
        let mut stream = provider.complete(request).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ResponseEvent::TextDelta("MOCK: hello".to_string()));
    }

    #[tokio::test]
    async fn scripted_provider_pops_scripts_in_order() {
        let provider = ScriptedMockProvider::tool_then_text(
            "scripted",
            "c1",
            "list_files",
            "{}",
            "done",
        );
        let mut first = provider.complete(CompletionRequest::default()).await.unwrap();
        match first.next().await.unwrap().unwrap() {
            ResponseEvent::ToolCall { name, .. } => assert_eq!(name.as_deref(), Some("list_files")),
            other => panic!("unexpected event {other:?}"),
        }

        let mut second = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(
            second.next().await.unwrap().unwrap(),
            ResponseEvent::TextDelta("done".to_string())
        );
    }

    #[tokio::test]
    async fn exhausted_scripts_yield_error_event() {
        let provider = ScriptedMockProvider::new("empty", vec![]);
        let mut stream = provider.complete(CompletionRequest::default()).await.unwrap();
        match stream.next().await.unwrap().unwrap() {
            ResponseEvent::Error(msg) => assert_eq!(msg, "[no more scripts]"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
