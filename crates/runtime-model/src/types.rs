// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// One role in a conversation, matching the wire vocabulary every provider
/// speaks (lowercase on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single fragment of multi-part message content (text or an image URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image {
        image_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::Image {
            image_url: url.into(),
            detail: None,
        }
    }

    pub fn image_with_detail(url: impl Into<String>, detail: impl Into<String>) -> Self {
        ContentPart::Image {
            image_url: url.into(),
            detail: Some(detail.into()),
        }
    }
}

/// Incremental fragment of a tool call as it arrives on the stream. Fragments
/// for the same `id` must be reassembled by concatenating `arguments` in
/// arrival order (see runtime-core's stream processor).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// A fully reassembled, ready-to-dispatch tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, kept as a string because that is how they
    /// arrive on the wire (and how providers expect them echoed back).
    pub arguments: String,
}

/// Usage counters for one model turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

/// A tool descriptor as sent to the provider (schema only, no handler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One message in a session's conversation, as presented to a model.
///
/// This is a leaner view than the store's persisted `Message` item (see
/// `runtime-store::domain::Message`) — it carries only what a provider needs
/// to see on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ContentParts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: ToolResultContent,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Parts(Vec<ToolContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContentPart {
    Text { text: String },
    Image { image_url: String },
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(t) => t.clone(),
            ToolResultContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ToolContentPart::Text { text } => Some(text.clone()),
                    ToolContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for ToolResultContent {
    fn from(s: String) -> Self {
        ToolResultContent::Text(s)
    }
}

impl From<&str> for ToolResultContent {
    fn from(s: &str) -> Self {
        ToolResultContent::Text(s.to_string())
    }
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<ToolResultContent>) -> Self {
        Message {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
            },
        }
    }

    pub fn as_text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::ContentParts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            MessageContent::ToolCall { function, .. } => function.arguments.clone(),
            MessageContent::ToolResult { content, .. } => content.as_text(),
        }
    }

    /// Coarse token estimate (chars/4 heuristic, images by detail level).
    /// Used only as a fallback when a provider doesn't return usage for a
    /// message we need to budget before it's ever been sent.
    pub fn approx_tokens(&self) -> usize {
        match &self.content {
            MessageContent::Text(t) => (t.chars().count() / 4).max(1),
            MessageContent::ContentParts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => (text.chars().count() / 4).max(1),
                    ContentPart::Image { detail, .. } => match detail.as_deref() {
                        Some("low") => 85,
                        _ => 765,
                    },
                })
                .sum(),
            MessageContent::ToolCall { function, .. } => {
                ((function.name.len() + function.arguments.len()) / 4).max(1)
            }
            MessageContent::ToolResult { content, .. } => {
                (content.as_text().chars().count() / 4).max(1)
            }
        }
    }
}

/// A request to open a streaming chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub stream: bool,
}

/// One event out of a provider's demultiplexed response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// `index` disambiguates concurrently-streamed tool calls within a
    /// single turn (providers emit fragments for several tool calls
    /// interleaved, keyed by their position rather than by id alone).
    ToolCall {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Usage(Usage),
    Done,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_token_estimate_is_chars_over_four() {
        let m = Message::user("abcdefgh");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn empty_text_message_has_at_least_one_token() {
        let m = Message::user("");
        assert_eq!(m.approx_tokens(), 1);
    }

    #[test]
    fn image_detail_low_costs_85_tokens() {
        let m = Message {
            role: Role::User,
            content: MessageContent::ContentParts(vec![ContentPart::image_with_detail(
                "data:image/png;base64,xx",
                "low",
            )]),
        };
        assert_eq!(m.approx_tokens(), 85);
    }

    #[test]
    fn image_without_detail_defaults_to_high_cost() {
        let m = Message {
            role: Role::User,
            content: MessageContent::ContentParts(vec![ContentPart::image("data:image/png;base64,xx")]),
        };
        assert_eq!(m.approx_tokens(), 765);
    }

    #[test]
    fn tool_result_as_text_joins_text_parts_only() {
        let content = ToolResultContent::Parts(vec![
            ToolContentPart::Text { text: "a".into() },
            ToolContentPart::Image {
                image_url: "data:...".into(),
            },
            ToolContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(content.as_text(), "a\nb");
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::tool_result("call-1", "ok");
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
