// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use runtime_model::{Message, MessageContent, Role};
use runtime_store::domain::{Item, Session, StoredMessage};

/// Default trailing-message window when an agent hasn't overridden it.
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// Coarse proxy for ~40k tokens; tool-role content beyond this cumulative
/// byte count (oldest first) is cleared before being sent to the model.
pub const TOOL_RESULT_CLEAR_THRESHOLD_BYTES: usize = 160_000;

const CLEARED_CONTENT: &str = "[Content cleared]";

/// Builds the message list sent to the model for the next turn. Summary
/// items become a synthetic system message; implicit messages are dropped;
/// the remainder is windowed to the trailing `max_messages` non-system
/// messages, expanded as needed to keep every surviving tool-call paired
/// with its tool-result.
pub fn build_prompt_messages(session: &Session, max_messages: usize) -> Vec<Message> {
    let mut summaries = Vec::new();
    let mut candidates: Vec<&StoredMessage> = Vec::new();

    for item in &session.items {
        match &item.payload {
            Item::Summary(summary) => summaries.push(summary.text.clone()),
            Item::Message(message) if !message.implicit => candidates.push(message),
            Item::Message(_) | Item::SubSession(_) => {}
        }
    }

    let windowed = window_preserving_tool_pairs(&candidates, max_messages);

    let mut prompt = Vec::with_capacity(summaries.len() + windowed.len());
    for summary in &summaries {
        prompt.push(Message::system(format!("Session Summary: {summary}")));
    }
    for message in windowed {
        prompt.extend(to_wire_messages(message));
    }
    prompt
}

fn window_preserving_tool_pairs<'a>(
    candidates: &[&'a StoredMessage],
    max_messages: usize,
) -> Vec<&'a StoredMessage> {
    if candidates.len() <= max_messages {
        return candidates.to_vec();
    }

    let mut start = candidates.len() - max_messages;
    // A window that opens on a tool-role message is missing the assistant
    // message that issued the call; walk back to include it.
    while start > 0 && candidates[start].role == Role::Tool {
        start -= 1;
    }

    let mut window: Vec<&StoredMessage> = candidates[start..].to_vec();

    let present_tool_call_ids: HashSet<&str> =
        window.iter().filter_map(|m| m.tool_call_id.as_deref()).collect();
    window.retain(|m| {
        m.role != Role::Assistant
            || m.tool_calls.iter().all(|call| present_tool_call_ids.contains(call.id.as_str()))
    });
    window
}

fn to_wire_messages(message: &StoredMessage) -> Vec<Message> {
    match message.role {
        Role::System => vec![Message::system(message.content.clone())],
        Role::User => vec![Message::user(message.content.clone())],
        Role::Tool => {
            let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
            vec![Message::tool_result(tool_call_id, message.content.clone())]
        }
        Role::Assistant => {
            let mut out = Vec::new();
            if !message.content.is_empty() {
                out.push(Message::assistant(message.content.clone()));
            }
            for call in &message.tool_calls {
                out.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::ToolCall {
                        tool_call_id: call.id.clone(),
                        function: call.function.clone(),
                    },
                });
            }
            out
        }
    }
}

/// Clears the oldest tool-role message contents (preserving `tool_call_id`)
/// until the cumulative size of tool output still present drops to the
/// threshold, once it has crossed it.
pub fn clear_stale_tool_output(session: &mut Session) {
    let tool_positions: Vec<usize> = session
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| matches!(&item.payload, Item::Message(m) if m.role == Role::Tool))
        .map(|(index, _)| index)
        .collect();

    let mut remaining: usize = tool_positions
        .iter()
        .filter_map(|&index| match &session.items[index].payload {
            Item::Message(m) => Some(m.content.len()),
            _ => None,
        })
        .sum();

    if remaining <= TOOL_RESULT_CLEAR_THRESHOLD_BYTES {
        return;
    }

    for index in tool_positions {
        if remaining <= TOOL_RESULT_CLEAR_THRESHOLD_BYTES {
            break;
        }
        if let Item::Message(m) = &mut session.items[index].payload {
            if m.content != CLEARED_CONTENT {
                remaining -= m.content.len();
                m.content = CLEARED_CONTENT.to_string();
            }
        }
    }
}
