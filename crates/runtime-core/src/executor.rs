// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use runtime_eventbus::{Event, EventBus};
use runtime_model::{Role, ToolCall};
use runtime_store::domain::{Session, StoredMessage};
use runtime_tools::{Tool, ToolAnnotations};
use tokio::sync::{oneshot, Mutex};

use crate::cancel::CancelToken;

/// The user's disposition toward a pending (non-bypassed) tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Approve,
    ApproveSession,
    Reject,
}

/// `transfer_task` and `handoff` need access to the agent manager and (for
/// `transfer_task`) the ability to recursively drive a child session — both
/// live above this crate's dependency on `runtime-tools`, so the executor
/// calls back into the runtime loop through this trait rather than owning
/// that machinery itself.
#[async_trait]
pub trait DelegationHandler: Send + Sync {
    async fn transfer_task(
        &self,
        call: &ToolCall,
        current_agent: &str,
        session: &mut Session,
    ) -> anyhow::Result<String>;
    async fn handoff(&self, call: &ToolCall, current_agent: &str, session: &mut Session) -> anyhow::Result<String>;
}

fn is_internal(name: &str) -> bool {
    name == "transfer_task" || name == "handoff"
}

enum ResolvedHandler {
    Internal,
    Plain(Arc<dyn Tool>),
}

fn resolve_handler(call: &ToolCall, agent_tools: &[Arc<dyn Tool>]) -> Option<ResolvedHandler> {
    if is_internal(&call.function.name) {
        return Some(ResolvedHandler::Internal);
    }
    agent_tools
        .iter()
        .find(|t| t.name() == call.function.name)
        .cloned()
        .map(ResolvedHandler::Plain)
}

fn canceled_message(agent_name: &str, call: &ToolCall) -> StoredMessage {
    let mut message = StoredMessage::new(agent_name, Role::Tool, "The tool call was canceled by the user.");
    message.tool_call_id = Some(call.id.clone());
    message
}

fn rejected_message(agent_name: &str, call: &ToolCall) -> StoredMessage {
    let mut message = StoredMessage::new(agent_name, Role::Tool, "The user rejected the tool call.");
    message.tool_call_id = Some(call.id.clone());
    message
}

fn result_message(agent_name: &str, call: &ToolCall, content: String) -> StoredMessage {
    let content = if content.is_empty() { "(no output)".to_string() } else { content };
    let mut message = StoredMessage::new(agent_name, Role::Tool, content);
    message.tool_call_id = Some(call.id.clone());
    message
}

/// Dispatches a turn's tool calls through the approval gate, runs whichever
/// handler resolves, and appends the resulting tool-role messages to the
/// session in order.
#[derive(Default)]
pub struct ToolExecutor {
    pending: Mutex<Option<oneshot::Sender<ResumeDecision>>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        ToolExecutor::default()
    }

    /// Non-blocking: delivers `decision` to whoever is waiting. If nothing is
    /// waiting the decision is silently dropped (no error, unlike the
    /// elicitation broker — an approval decision arriving with nothing
    /// pending is not itself a fault condition).
    pub async fn resume(&self, decision: ResumeDecision) {
        if let Some(tx) = self.pending.lock().await.take() {
            let _ = tx.send(decision);
        }
    }

    /// Also used by the runtime loop's max-iterations checkpoint: both are
    /// "pause and wait for an out-of-band decision" rendezvous over the same
    /// {approve, approve-session, reject} vocabulary.
    pub(crate) async fn await_decision(&self, cancel: &mut CancelToken) -> Option<ResumeDecision> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);
        tokio::select! {
            result = rx => result.ok(),
            _ = cancel.cancelled() => {
                *self.pending.lock().await = None;
                None
            }
        }
    }

    pub async fn process_tool_calls(
        &self,
        cancel: &mut CancelToken,
        session: &mut Session,
        calls: &[ToolCall],
        agent_tools: &[Arc<dyn Tool>],
        current_agent: &str,
        bus: &EventBus,
        delegation: &dyn DelegationHandler,
    ) {
        for (index, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                for remaining in &calls[index..] {
                    session.push_message(canceled_message(current_agent, remaining));
                }
                return;
            }

            let handler = match resolve_handler(call, agent_tools) {
                Some(handler) => handler,
                None => continue,
            };

            let annotations = match &handler {
                ResolvedHandler::Internal => ToolAnnotations {
                    read_only_hint: true,
                    ..ToolAnnotations::default()
                },
                ResolvedHandler::Plain(tool) => tool.annotations(),
            };

            let bypassed = session.tools_approved || annotations.read_only_hint;
            let decision = if bypassed {
                ResumeDecision::Approve
            } else {
                bus.publish(Event::ToolCallConfirmation {
                    call: call.clone(),
                    tool_name: call.function.name.clone(),
                    annotations: annotations.clone(),
                })
                .await;
                match self.await_decision(cancel).await {
                    Some(decision) => decision,
                    None => {
                        for remaining in &calls[index..] {
                            session.push_message(canceled_message(current_agent, remaining));
                        }
                        return;
                    }
                }
            };

            match decision {
                ResumeDecision::Reject => {
                    bus.publish(Event::ToolCallResponse {
                        call_id: call.id.clone(),
                        output: "The user rejected the tool call.".to_string(),
                        is_error: false,
                    })
                    .await;
                    session.push_message(rejected_message(current_agent, call));
                }
                ResumeDecision::Approve | ResumeDecision::ApproveSession => {
                    if decision == ResumeDecision::ApproveSession {
                        session.approve_for_session();
                    }
                    self.run_handler(cancel, session, call, &handler, current_agent, bus, delegation)
                        .await;
                }
            }
        }
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        handler: &ResolvedHandler,
        current_agent: &str,
        session: &mut Session,
        delegation: &dyn DelegationHandler,
    ) -> anyhow::Result<String> {
        match handler {
            ResolvedHandler::Internal => match call.function.name.as_str() {
                "transfer_task" => delegation.transfer_task(call, current_agent, session).await,
                "handoff" => delegation.handoff(call, current_agent, session).await,
                other => anyhow::bail!("unregistered internal tool: {other}"),
            },
            ResolvedHandler::Plain(tool) => tool.execute(call).await.map(|out| {
                if out.is_error {
                    format!("error calling tool: {}", out.content)
                } else {
                    out.content
                }
            }),
        }
    }

    async fn run_handler(
        &self,
        cancel: &mut CancelToken,
        session: &mut Session,
        call: &ToolCall,
        handler: &ResolvedHandler,
        current_agent: &str,
        bus: &EventBus,
        delegation: &dyn DelegationHandler,
    ) {
        bus.publish(Event::ToolCall { call: call.clone() }).await;

        let outcome = tokio::select! {
            result = self.invoke(call, handler, current_agent, session, delegation) => Some(result),
            _ = cancel.cancelled() => None,
        };

        let (output, is_error) = match outcome {
            None => ("The tool call was canceled by the user.".to_string(), true),
            Some(Ok(output)) => (output, false),
            Some(Err(err)) => (format!("error calling tool: {err}"), true),
        };

        bus.publish(Event::ToolCallResponse {
            call_id: call.id.clone(),
            output: output.clone(),
            is_error,
        })
        .await;
        session.push_message(result_message(current_agent, call, output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_tools::ToolOutput;
    use serde_json::Value;

    struct StubDelegation;

    #[async_trait]
    impl DelegationHandler for StubDelegation {
        async fn transfer_task(
            &self,
            _call: &ToolCall,
            _current_agent: &str,
            _session: &mut Session,
        ) -> anyhow::Result<String> {
            Ok("child said hi".to_string())
        }
        async fn handoff(&self, _call: &ToolCall, _current_agent: &str, _session: &mut Session) -> anyhow::Result<String> {
            Ok("handed off".to_string())
        }
    }

    struct ReadOnlyTool;

    #[async_trait]
    impl Tool for ReadOnlyTool {
        fn name(&self) -> &str {
            "list_files"
        }
        fn description(&self) -> &str {
            "lists files"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({})
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations {
                read_only_hint: true,
                ..ToolAnnotations::default()
            }
        }
        async fn execute(&self, call: &ToolCall) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::ok(call.id.clone(), "a.txt\nb.txt"))
        }
    }

    struct WriteTool;

    #[async_trait]
    impl Tool for WriteTool {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            "writes a file"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({})
        }
        async fn execute(&self, call: &ToolCall) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::ok(call.id.clone(), "wrote"))
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: runtime_model::FunctionCall {
                name: name.into(),
                arguments: "{}".into(),
            },
        }
    }

    #[tokio::test]
    async fn read_only_tool_skips_approval() {
        let bus = EventBus::new();
        let executor = ToolExecutor::new();
        let mut session = Session::new("/tmp");
        let (_handle, mut cancel) = crate::cancel::CancelHandle::new();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ReadOnlyTool)];
        let calls = vec![call("c1", "list_files")];
        let mut rx = bus.subscribe("t").await;

        executor
            .process_tool_calls(&mut cancel, &mut session, &calls, &tools, "root", &bus, &StubDelegation)
            .await;

        let mut saw_confirmation = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::ToolCallConfirmation { .. }) {
                saw_confirmation = true;
            }
        }
        assert!(!saw_confirmation);
        assert_eq!(session.messages().count(), 1);
    }

    #[tokio::test]
    async fn rejection_appends_exactly_one_tool_message_without_running_handler() {
        let bus = EventBus::new();
        let executor = ToolExecutor::new();
        let mut session = Session::new("/tmp");
        let (_handle, mut cancel) = crate::cancel::CancelHandle::new();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WriteTool)];
        let calls = vec![call("c1", "write_file")];

        let resumer = {
            let executor = &executor;
            async move {
                tokio::task::yield_now().await;
                executor.resume(ResumeDecision::Reject).await;
            }
        };
        let runner = executor.process_tool_calls(&mut cancel, &mut session, &calls, &tools, "root", &bus, &StubDelegation);
        tokio::join!(runner, resumer);

        let messages: Vec<_> = session.messages().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "The user rejected the tool call.");
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn session_wide_approval_latches_for_the_second_call() {
        let bus = EventBus::new();
        let executor = ToolExecutor::new();
        let mut session = Session::new("/tmp");
        let (_handle, mut cancel) = crate::cancel::CancelHandle::new();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WriteTool)];
        let calls = vec![call("c1", "write_file"), call("c2", "write_file")];
        let mut rx = bus.subscribe("t").await;

        let resumer = {
            let executor = &executor;
            async move {
                tokio::task::yield_now().await;
                executor.resume(ResumeDecision::ApproveSession).await;
            }
        };
        let runner = executor.process_tool_calls(&mut cancel, &mut session, &calls, &tools, "root", &bus, &StubDelegation);
        tokio::join!(runner, resumer);

        assert!(session.tools_approved);
        let mut confirmations = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::ToolCallConfirmation { .. }) {
                confirmations += 1;
            }
        }
        assert_eq!(confirmations, 1);
        assert_eq!(session.messages().count(), 2);
    }

    #[tokio::test]
    async fn cancellation_mid_batch_synthesizes_canceled_message_per_remaining_call() {
        let bus = EventBus::new();
        let executor = ToolExecutor::new();
        let mut session = Session::new("/tmp");
        let (handle, mut cancel) = crate::cancel::CancelHandle::new();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WriteTool)];
        let calls = vec![call("c1", "write_file"), call("c2", "write_file"), call("c3", "write_file")];

        let canceller = async move {
            tokio::task::yield_now().await;
            handle.cancel();
        };
        let runner = executor.process_tool_calls(&mut cancel, &mut session, &calls, &tools, "root", &bus, &StubDelegation);
        tokio::join!(runner, canceller);

        let messages: Vec<_> = session.messages().collect();
        assert_eq!(messages.len(), 3);
        for (message, expected_id) in messages.iter().zip(["c1", "c2", "c3"]) {
            assert_eq!(message.content, "The tool call was canceled by the user.");
            assert_eq!(message.tool_call_id.as_deref(), Some(expected_id));
        }
    }

    #[tokio::test]
    async fn unresolved_tool_name_is_silently_skipped() {
        let bus = EventBus::new();
        let executor = ToolExecutor::new();
        let mut session = Session::new("/tmp");
        session.tools_approved = true;
        let (_handle, mut cancel) = crate::cancel::CancelHandle::new();
        let calls = vec![call("c1", "does_not_exist")];

        executor
            .process_tool_calls(&mut cancel, &mut session, &calls, &[], "root", &bus, &StubDelegation)
            .await;

        assert_eq!(session.messages().count(), 0);
    }
}
