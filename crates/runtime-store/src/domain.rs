// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use runtime_model::{ContentPart, Role, ToolCall, Usage};
use runtime_tools::ToolAnnotations;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A named tool descriptor as persisted alongside a message. Deduplicated by
/// content hash so that offering the same tool across many messages does not
/// repeat its schema on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub category: String,
    pub description: String,
    pub parameters: Value,
    pub annotations: ToolAnnotations,
    pub output_schema: Option<Value>,
}

impl ToolDefinition {
    /// SHA-256 over the canonical (key-sorted) JSON encoding, so two
    /// definitions that differ only in field order hash identically.
    pub fn content_hash(&self) -> String {
        let canonical = canonical_json(&serde_json::to_value(self).expect("tool definition serializes"));
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Recursively sorts object keys so hashing is stable regardless of
/// insertion order.
fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by_key(|(k, _)| k.clone());
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// A message as persisted in a session's item list. Distinct from
/// `runtime_model::Message` (the lean provider-facing view): this carries
/// the bookkeeping fields the store and runtime loop need (usage, cost,
/// timestamps, the agent that authored it, tool-call metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub agent_name: String,
    /// Implicit messages (synthetic instructions such as "Follow the default
    /// instructions") are dropped from the model-facing trimmed history.
    pub implicit: bool,
    pub role: Role,
    pub content: String,
    pub multi_content: Vec<ContentPart>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub tool_definitions: Vec<ToolDefinition>,
    pub usage: Usage,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub cache_control: Option<String>,
}

impl StoredMessage {
    pub fn new(agent_name: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        StoredMessage {
            agent_name: agent_name.into(),
            implicit: false,
            role,
            content: content.into(),
            multi_content: Vec::new(),
            reasoning_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_definitions: Vec::new(),
            usage: Usage::default(),
            cost: 0.0,
            created_at: Utc::now(),
            cache_control: None,
        }
    }

    /// An assistant message is only ever appended when it carries content or
    /// tool calls (providers reject an empty one).
    pub fn is_emittable_assistant(&self) -> bool {
        !(self.role == Role::Assistant && self.content.is_empty() && self.tool_calls.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubSessionRef {
    pub session_id: String,
}

/// Exactly one of a message, a compacted-history summary, or a pointer to a
/// delegated sub-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    Message(StoredMessage),
    Summary(Summary),
    SubSession(SubSessionRef),
}

/// An item together with its store-assigned identity and dense, zero-based
/// position within the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionItem {
    pub id: String,
    pub position: usize,
    pub payload: Item,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// The unit of conversation state, shared by the Session Store, Agent
/// Manager, Stream Processor, and Runtime Loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub working_dir: String,
    pub items: Vec<SessionItem>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub tools_approved: bool,
    pub thinking: bool,
    pub send_user_message: bool,
    pub max_iterations: usize,
    pub permissions: Permissions,
    pub agent_model_overrides: HashMap<String, String>,
    pub custom_models_used: HashSet<String>,
    pub parent_id: String,
    pub starred: bool,
}

impl Session {
    pub fn new(working_dir: impl Into<String>) -> Self {
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            title: String::new(),
            created_at: Utc::now(),
            working_dir: working_dir.into(),
            items: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            tools_approved: false,
            thinking: false,
            send_user_message: true,
            max_iterations: 0,
            permissions: Permissions::default(),
            agent_model_overrides: HashMap::new(),
            custom_models_used: HashSet::new(),
            parent_id: String::new(),
            starred: false,
        }
    }

    pub fn context_fraction(&self, context_limit: usize) -> f64 {
        if context_limit == 0 {
            return 0.0;
        }
        (self.input_tokens + self.output_tokens) as f64 / context_limit as f64
    }

    /// Record usage from one model turn. Counters are monotonically
    /// non-decreasing by construction (we only ever add).
    pub fn record_usage(&mut self, usage: &Usage, cost_delta: f64) {
        self.input_tokens += usage.input_tokens + usage.cache_read_tokens + usage.cache_write_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += cost_delta;
    }

    /// Monotonic latch: once true, stays true for the life of the session.
    pub fn approve_for_session(&mut self) {
        self.tools_approved = true;
    }

    pub fn messages(&self) -> impl Iterator<Item = &StoredMessage> {
        self.items.iter().filter_map(|item| match &item.payload {
            Item::Message(m) => Some(m),
            _ => None,
        })
    }

    /// Appends a message as the next dense position; does not assign a
    /// store-level id (stores do that on `add_item`/`update_session`). Used
    /// by in-process callers (e.g. the runtime loop) building up a session
    /// before it is ever persisted.
    pub fn push_message(&mut self, message: StoredMessage) {
        let position = self.items.len();
        self.items.push(SessionItem {
            id: uuid::Uuid::new_v4().to_string(),
            position,
            payload: Item::Message(message),
        });
    }

    pub fn last_assistant_message_content(&self) -> String {
        self.messages()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// Lightweight metadata returned by `GetSessionSummaries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub starred: bool,
}
