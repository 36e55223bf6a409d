// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use runtime_model::{ToolCall, Usage};
use runtime_tools::ToolAnnotations;
use serde::{Deserialize, Serialize};

/// A tagged union of every observable the runtime produces. Every subsystem
/// communicates with the outside world exclusively by publishing one of
/// these onto the Event Bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    StreamStarted { session_id: String },
    StreamStopped { session_id: String },
    UserMessage { session_id: String, content: String },
    AgentChoice { delta: String },
    AgentChoiceReasoning { delta: String },
    PartialToolCall { id: String },
    ToolCall { call: ToolCall },
    ToolCallConfirmation { call: ToolCall, tool_name: String, annotations: ToolAnnotations },
    ToolCallResponse { call_id: String, output: String, is_error: bool },
    MaxIterationsReached { limit: usize },
    TokenUsage { usage: Usage, total_input: u64, total_output: u64, cost: f64 },
    SessionTitle { session_id: String, title: String },
    SessionCompactionStarted { session_id: String },
    SessionCompactionCompleted { session_id: String },
    SessionSummary { session_id: String, summary: String },
    AgentSwitching { direction: SwitchDirection, from: String, to: String },
    AgentInfo { name: String },
    TeamInfo { agent_names: Vec<String> },
    ToolsetInfo { tool_names: Vec<String> },
    McpInitStarted,
    McpInitFinished,
    Warning { message: String },
    Error { message: String },
    ElicitationRequest { id: String, prompt: String },
    Authorization { provider: String },
    RagIndexingStarted,
    RagIndexingProgress { processed: usize, total: usize },
    RagIndexingCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchDirection {
    In,
    Out,
}
