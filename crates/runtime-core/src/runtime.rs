// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use runtime_agents::{Agent, AgentManager};
use runtime_elicit::{ElicitationAction, ElicitationBroker, ElicitationError};
use runtime_eventbus::{Event, EventBus, SwitchDirection};
use runtime_model::{CloneOptions, CompletionRequest, Message, ModelProvider, Role, ToolCall, ToolSchema, Usage};
use runtime_store::{Session, SessionStore, StoredMessage};
use runtime_tools::Tool;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::compact;
use crate::executor::{DelegationHandler, ResumeDecision, ToolExecutor};
use crate::stream;
use crate::trim;

const TITLE_PROMPT: &str = "Generate a short, descriptive title for the following conversation, based \
     on the user's first message. Respond with the title only, no punctuation or quotation marks.";

/// Runtime-wide knobs a caller sets once per [`RuntimeLoop`].
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub current_agent: String,
    pub session_compaction: bool,
    pub managed_oauth: bool,
    pub max_messages: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            current_agent: "root".to_string(),
            session_compaction: true,
            managed_oauth: true,
            max_messages: trim::DEFAULT_MAX_MESSAGES,
        }
    }
}

/// The composition root: drives turns for a `Team`, gates tool calls through
/// approval, recursively opens sub-sessions for delegated tasks, and
/// publishes every observable onto a shared [`EventBus`].
pub struct RuntimeLoop {
    manager: Arc<AgentManager>,
    bus: Arc<EventBus>,
    store: Arc<dyn SessionStore>,
    executor: Arc<ToolExecutor>,
    elicitation: Arc<ElicitationBroker>,
    options: RuntimeOptions,
}

impl RuntimeLoop {
    pub async fn new(
        manager: Arc<AgentManager>,
        store: Arc<dyn SessionStore>,
        options: RuntimeOptions,
    ) -> anyhow::Result<Arc<Self>> {
        manager.set_current_agent(&options.current_agent).await?;
        let bus = EventBus::new();
        let elicitation = ElicitationBroker::new(bus.clone());
        Ok(Arc::new(RuntimeLoop {
            manager,
            bus,
            store,
            executor: Arc::new(ToolExecutor::new()),
            elicitation,
            options,
        }))
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Subscribes before spawning so no early event (the Setup sequence) is
    /// ever missed by the returned receiver.
    pub async fn run_stream(self: &Arc<Self>, session: Session, cancel: CancelToken) -> mpsc::Receiver<Event> {
        let rx = self.bus.subscribe(session.id.clone()).await;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut session = session;
            let mut cancel = cancel;
            // Persisted up front (not only at teardown) so a `transfer_task`
            // mid-turn can look up this session as a sub-session parent.
            if let Err(err) = this.store.update_session(session.clone()).await {
                warn!(session_id = %session.id, error = %err, "failed to persist session state at setup");
            }
            this.run_turns(&mut session, &mut cancel).await;
            let session_id = session.id.clone();
            if let Err(err) = this.store.update_session(session).await {
                warn!(session_id = %session_id, error = %err, "failed to persist session state at teardown");
            }
            this.bus.unsubscribe(&session_id).await;
        });
        rx
    }

    /// Drains the stream, converting any `Error` event into a returned
    /// error; otherwise returns the final message list.
    pub async fn run(self: &Arc<Self>, session: Session, cancel: CancelToken) -> anyhow::Result<Vec<StoredMessage>> {
        let session_id = session.id.clone();
        let mut rx = self.run_stream(session, cancel).await;
        let mut error = None;
        while let Some(event) = rx.recv().await {
            if let Event::Error { message } = event {
                error = Some(message);
            }
        }
        if let Some(message) = error {
            anyhow::bail!(message);
        }
        let stored = self.store.get_session(&session_id).await?;
        Ok(stored.messages().cloned().collect())
    }

    pub async fn resume(&self, decision: ResumeDecision) {
        self.executor.resume(decision).await;
    }

    pub async fn resume_elicitation(
        &self,
        action: ElicitationAction,
        content: Option<serde_json::Value>,
    ) -> Result<(), ElicitationError> {
        self.elicitation.resume(action, content).await
    }

    /// On-demand compaction against the session's current agent.
    pub async fn summarize(&self, session: &mut Session) -> anyhow::Result<()> {
        let agent = self
            .manager
            .current_agent()
            .await
            .ok_or_else(|| anyhow::anyhow!("no current agent configured"))?;
        compact::compact_session(agent.model.as_ref(), session, &self.bus).await
    }

    /// Setup → Iterate → [MaxReached → await-resume]* → StreamCall → Record
    /// → Tools → {Iterate|Stopped} → Teardown, run to completion. Used both
    /// by the top-level driver spawned from `run_stream` and recursively by
    /// `transfer_task` for a child session sharing this same bus.
    async fn run_turns(&self, session: &mut Session, cancel: &mut CancelToken) {
        let agent = match self.manager.current_agent().await {
            Some(agent) => agent,
            None => {
                self.bus
                    .publish(Event::Error {
                        message: "no agent configured".to_string(),
                    })
                    .await;
                return;
            }
        };

        self.manager.emit_agent_info(&agent, &self.bus).await;
        self.manager.emit_team_info(&self.bus).await;
        self.manager.emit_agent_warnings(&agent, &self.bus).await;

        let tools = match self.manager.get_tools(&agent, &self.bus).await {
            Ok(tools) => tools,
            Err(err) => {
                self.bus.publish(Event::Error { message: err.to_string() }).await;
                return;
            }
        };
        self.manager.emit_toolset_info(&tools, &self.bus).await;
        self.wire_elicitation(&agent, cancel);

        if session.send_user_message {
            if let Some(last_user) = session.messages().rev().find(|m| m.role == Role::User) {
                self.bus
                    .publish(Event::UserMessage {
                        session_id: session.id.clone(),
                        content: last_user.content.clone(),
                    })
                    .await;
            }
        }

        self.bus.publish(Event::StreamStarted { session_id: session.id.clone() }).await;

        let title_task = if session.title.is_empty() {
            let first_user = session
                .messages()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Some(self.spawn_title_generation(agent.model.clone(), first_user, session.id.clone()))
        } else {
            None
        };

        let mut turns: usize = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if session.max_iterations > 0 && turns >= session.max_iterations {
                self.bus
                    .publish(Event::MaxIterationsReached { limit: session.max_iterations })
                    .await;
                match self.executor.await_decision(cancel).await {
                    Some(ResumeDecision::Approve) | Some(ResumeDecision::ApproveSession) => {
                        session.max_iterations += 10;
                    }
                    _ => {
                        let message = format!(
                            "I have reached the maximum number of iterations ({}). Stopping as requested by user.",
                            session.max_iterations
                        );
                        session.push_message(StoredMessage::new(&agent.name, Role::Assistant, message));
                        break;
                    }
                }
            }
            turns += 1;

            if self.options.session_compaction {
                if let Some(limit) = agent.model.context_limit() {
                    if limit > 0 && session.context_fraction(limit) > 0.9 {
                        if let Err(err) = compact::compact_session(agent.model.as_ref(), session, &self.bus).await {
                            warn!(error = %err, "compaction failed");
                        }
                        self.bus
                            .publish(Event::TokenUsage {
                                usage: Usage::default(),
                                total_input: session.input_tokens,
                                total_output: session.output_tokens,
                                cost: session.cost,
                            })
                            .await;
                    }
                }
            }

            trim::clear_stale_tool_output(session);
            let messages = trim::build_prompt_messages(session, self.options.max_messages);
            let mut request = CompletionRequest {
                messages,
                tools: build_tool_schemas(&agent, &tools),
                stream: true,
            };

            let mut stream_result = tokio::select! {
                result = agent.model.complete(request.clone()) => result,
                _ = cancel.cancelled() => break,
            };

            // A hard context-size overflow reported by the provider gets one
            // emergency-compaction-and-retry before the turn gives up; any
            // other failure to open the stream fails the turn immediately.
            if let Err(err) = &stream_result {
                if let crate::error::RuntimeError::ContextOverflow { limit } = stream::classify_stream_error(err) {
                    warn!(limit, "context overflow opening stream; emergency-compacting and retrying once");
                    compact::emergency_compact(session, compact::DEFAULT_EMERGENCY_KEEP_N);
                    trim::clear_stale_tool_output(session);
                    request.messages = trim::build_prompt_messages(session, self.options.max_messages);
                    stream_result = tokio::select! {
                        result = agent.model.complete(request) => result,
                        _ = cancel.cancelled() => break,
                    };
                }
            }

            let response_stream = match stream_result {
                Ok(s) => s,
                Err(err) => {
                    self.bus.publish(Event::Error { message: err.to_string() }).await;
                    break;
                }
            };

            let (result, usage, cost_delta) = tokio::select! {
                r = stream::process_stream(response_stream, &self.bus, agent.model.cost_descriptor()) => r,
                _ = cancel.cancelled() => break,
            };

            if let Some(message) = result.error.clone() {
                self.bus.publish(Event::Error { message }).await;
                break;
            }

            session.record_usage(&usage, cost_delta);
            self.bus
                .publish(Event::TokenUsage {
                    usage,
                    total_input: session.input_tokens,
                    total_output: session.output_tokens,
                    cost: session.cost,
                })
                .await;

            if !result.content.is_empty() || !result.tool_calls.is_empty() {
                let mut message = StoredMessage::new(&agent.name, Role::Assistant, result.content.clone());
                message.tool_calls = result.tool_calls.clone();
                if !result.reasoning_content.is_empty() {
                    message.reasoning_content = Some(result.reasoning_content.clone());
                }
                session.push_message(message);
            }

            if !result.tool_calls.is_empty() {
                let delegation = RuntimeDelegation {
                    runtime: self,
                    cancel: cancel.clone(),
                };
                self.executor
                    .process_tool_calls(cancel, session, &result.tool_calls, &tools, &agent.name, &self.bus, &delegation)
                    .await;
            }

            if result.stopped {
                break;
            }
        }

        self.bus.publish(Event::StreamStopped { session_id: session.id.clone() }).await;
        if let Some(handle) = title_task {
            if let Ok(Some(title)) = handle.await {
                session.title = title;
            }
        }
    }

    fn wire_elicitation(&self, agent: &Agent, cancel: &CancelToken) {
        for toolset in &agent.toolsets {
            let broker = self.elicitation.clone();
            let cancel = cancel.clone();
            toolset.set_elicitation_handler(Arc::new(move |title: String, prompt: String| {
                let broker = broker.clone();
                let mut cancel = cancel.clone();
                Box::pin(async move {
                    let full_prompt = format!("{title}: {prompt}");
                    let result = broker.handle(full_prompt, async move { cancel.cancelled().await }).await;
                    Ok(match result.action {
                        ElicitationAction::Accept => result.content.map(|v| v.to_string()).unwrap_or_default(),
                        ElicitationAction::Decline => "declined".to_string(),
                        ElicitationAction::Cancel => "canceled".to_string(),
                    })
                })
            }));
        }
        for toolset in &agent.toolsets {
            toolset.set_managed_oauth(self.options.managed_oauth);
        }
    }

    fn spawn_title_generation(
        &self,
        model: Arc<dyn ModelProvider>,
        first_user_message: String,
        session_id: String,
    ) -> tokio::task::JoinHandle<Option<String>> {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let model = model.clone_with_options(CloneOptions {
                max_tokens: Some(100),
                structured_output: None,
            });
            let request = CompletionRequest {
                messages: vec![Message::user(format!("{TITLE_PROMPT}\n\n{first_user_message}"))],
                tools: Vec::new(),
                stream: true,
            };
            let stream = model.complete(request).await.ok()?;
            // A private, unsubscribed bus: title-generation deltas never
            // belong on the conversation's own event stream.
            let scratch_bus = EventBus::new();
            let (result, _usage, _cost) = stream::process_stream(stream, &scratch_bus, None).await;
            let trimmed = result.content.trim();
            if trimmed.is_empty() {
                return None;
            }
            let title = truncate_title(trimmed, 50);
            bus.publish(Event::SessionTitle {
                session_id,
                title: title.clone(),
            })
            .await;
            Some(title)
        })
    }
}

fn transfer_task_schema() -> ToolSchema {
    ToolSchema {
        name: "transfer_task".to_string(),
        description: "Transfer a task to another agent on the team and wait for its result.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string"},
                "task": {"type": "string"},
                "expected_output": {"type": "string"}
            },
            "required": ["agent", "task", "expected_output"]
        }),
    }
}

fn handoff_schema() -> ToolSchema {
    ToolSchema {
        name: "handoff".to_string(),
        description: "Hand the conversation off to another agent on the team.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {"agent": {"type": "string"}},
            "required": ["agent"]
        }),
    }
}

fn build_tool_schemas(agent: &Agent, tools: &[Arc<dyn Tool>]) -> Vec<ToolSchema> {
    let mut schemas: Vec<ToolSchema> = tools
        .iter()
        .map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    if !agent.sub_agents.is_empty() {
        schemas.push(transfer_task_schema());
        schemas.push(handoff_schema());
    }
    schemas
}

/// For any string, returns a result of display length at most `max_len`; if
/// the input is longer and `max_len >= 3` the result ends in `"..."`.
fn truncate_title(input: &str, max_len: usize) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= max_len {
        return input.to_string();
    }
    if max_len < 3 {
        return "...".to_string();
    }
    let keep: String = chars[..max_len - 3].iter().collect();
    format!("{keep}...")
}

#[derive(Deserialize)]
struct TransferTaskArgs {
    agent: String,
    task: String,
    expected_output: String,
}

#[derive(Deserialize)]
struct HandoffArgs {
    agent: String,
}

/// Binds the active `RuntimeLoop` and the turn's cancellation token into the
/// `DelegationHandler` seam the executor calls through.
struct RuntimeDelegation<'a> {
    runtime: &'a RuntimeLoop,
    cancel: CancelToken,
}

#[async_trait]
impl<'a> DelegationHandler for RuntimeDelegation<'a> {
    async fn transfer_task(&self, call: &ToolCall, current_agent: &str, session: &mut Session) -> anyhow::Result<String> {
        let args: TransferTaskArgs = serde_json::from_str(&call.function.arguments)
            .map_err(|err| anyhow::anyhow!("invalid transfer_task arguments: {err}"))?;

        let child_agent = self
            .runtime
            .manager
            .agent(&args.agent)
            .ok_or_else(|| anyhow::anyhow!("agent not found: {}", args.agent))?;

        self.runtime
            .bus
            .publish(Event::AgentSwitching {
                direction: SwitchDirection::In,
                from: current_agent.to_string(),
                to: args.agent.clone(),
            })
            .await;
        self.runtime.manager.set_current_agent(&args.agent).await?;

        let system_message = format!(
            "You are a member of a team of agents working together to complete a larger objective.\n\n\
             <task>\n{}\n</task>\n\n<expected_output>\n{}\n</expected_output>",
            args.task, args.expected_output,
        );

        let mut child = Session::new(session.working_dir.clone());
        child.parent_id = session.id.clone();
        child.title = "Transferred task".to_string();
        child.tools_approved = session.tools_approved;
        child.send_user_message = false;
        child.max_iterations = child_agent.max_iterations;
        child.push_message(StoredMessage::new(&args.agent, Role::System, system_message));
        let mut implicit = StoredMessage::new(&args.agent, Role::User, "Follow the default instructions");
        implicit.implicit = true;
        child.push_message(implicit);

        // Persisted up front so a nested transfer_task within the child can
        // find it as a sub-session parent in turn.
        if let Err(err) = self.runtime.store.update_session(child.clone()).await {
            warn!(error = %err, "failed to persist sub-session state before delegation");
        }
        let mut child_cancel = self.cancel.clone();
        self.runtime.run_turns(&mut child, &mut child_cancel).await;

        // Session-wide approval granted during the child persists back to
        // the parent; the reverse direction never applies.
        session.tools_approved = session.tools_approved || child.tools_approved;
        let output = child.last_assistant_message_content();

        if let Err(err) = self.runtime.store.add_sub_session(&session.id, child).await {
            warn!(error = %err, "failed to persist sub-session");
        }

        self.runtime
            .bus
            .publish(Event::AgentSwitching {
                direction: SwitchDirection::Out,
                from: args.agent.clone(),
                to: current_agent.to_string(),
            })
            .await;
        self.runtime.manager.set_current_agent(current_agent).await?;
        if let Some(agent) = self.runtime.manager.agent(current_agent) {
            self.runtime.manager.emit_agent_info(&agent, &self.runtime.bus).await;
        }

        Ok(output)
    }

    async fn handoff(&self, call: &ToolCall, current_agent: &str, _session: &mut Session) -> anyhow::Result<String> {
        let args: HandoffArgs = serde_json::from_str(&call.function.arguments)
            .map_err(|err| anyhow::anyhow!("invalid handoff arguments: {err}"))?;
        self.runtime.manager.set_current_agent(&args.agent).await?;
        Ok(format!(
            "You have been handed the conversation by {current_agent}. Continue it and use `handoff` \
             back to {current_agent} when you are done."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use runtime_agents::Team;
    use runtime_model::ResponseEvent;
    use runtime_store::InMemoryStore;

    #[test]
    fn truncate_title_leaves_short_strings_untouched() {
        assert_eq!(truncate_title("short", 50), "short");
    }

    #[test]
    fn truncate_title_appends_ellipsis_when_over_budget() {
        let long = "a".repeat(60);
        let truncated = truncate_title(&long, 50);
        assert_eq!(truncated.chars().count(), 50);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_title_with_tiny_budget_is_just_dots() {
        assert_eq!(truncate_title("anything", 2), "...");
    }

    /// Fails the first `complete()` call with a context-overflow-shaped
    /// error, then succeeds with a plain text reply on the retry.
    struct FlakyContextOverflowProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelProvider for FlakyContextOverflowProvider {
        fn id(&self) -> &str {
            "mock"
        }
        fn model_name(&self) -> &str {
            "flaky"
        }
        async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<runtime_model::ResponseStream> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!(
                    r#"provider error: {{"error":{{"type":"exceed_context_size_error","n_ctx":4096}}}}"#
                );
            }
            let events = vec![ResponseEvent::TextDelta("recovered".to_string()), ResponseEvent::Done];
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
        }
        fn clone_with_options(&self, _options: CloneOptions) -> Box<dyn ModelProvider> {
            Box::new(FlakyContextOverflowProvider { calls: self.calls.clone() })
        }
    }

    #[tokio::test]
    async fn context_overflow_on_stream_open_triggers_one_emergency_compact_and_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut agent = Agent::new("root", "system", Arc::new(FlakyContextOverflowProvider { calls: calls.clone() }));
        agent.max_iterations = 0;
        let mut team = Team::new();
        team.insert(agent);
        let manager = Arc::new(AgentManager::new(Arc::new(team)));
        let store = Arc::new(InMemoryStore::new());
        let runtime = RuntimeLoop::new(manager, store.clone(), RuntimeOptions::default())
            .await
            .unwrap();

        let mut session = Session::new("/tmp");
        session.title = "not empty".to_string();
        for i in 0..20 {
            session.push_message(StoredMessage::new("root", Role::User, format!("padding message {i}")));
        }
        let session_id = session.id.clone();
        let (_handle, cancel) = crate::cancel::CancelHandle::new();

        let mut rx = runtime.run_stream(session, cancel).await;
        let mut saw_error = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(!saw_error);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stored = store.get_session(&session_id).await.unwrap();
        assert_eq!(stored.last_assistant_message_content(), "recovered");
    }
}
