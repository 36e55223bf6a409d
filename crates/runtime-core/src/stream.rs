// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};

use runtime_eventbus::{Event, EventBus};
use runtime_model::{ModelCostDescriptor, ResponseEvent, ResponseStream, ToolCall, Usage};

use futures::StreamExt;

use crate::error::RuntimeError;

/// Classifies a failure from opening a model's completion stream. Mirrors a
/// server reporting a hard context-size overflow as a structured JSON body
/// (`{"error":{"type":"exceed_context_size_error","n_ctx":...}}` or the flat
/// `{"n_ctx":...}` shape) so the Runtime Loop can recover with an emergency
/// compaction instead of simply failing the turn.
pub fn classify_stream_error(err: &anyhow::Error) -> RuntimeError {
    if let Some(limit) = extract_n_ctx_from_error(err) {
        return RuntimeError::ContextOverflow { limit };
    }
    RuntimeError::StreamOpenFailed(err.to_string())
}

fn extract_n_ctx_from_error(err: &anyhow::Error) -> Option<usize> {
    let message = err.to_string();
    let start = message.find('{')?;
    let body: serde_json::Value = serde_json::from_str(&message[start..]).ok()?;
    body["error"]["n_ctx"]
        .as_u64()
        .or_else(|| body["n_ctx"].as_u64())
        .map(|n| n as usize)
}

/// Accumulated outcome of draining one model turn's stream.
#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stopped: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PendingToolCall {
    fn finish(self, fallback_id: u32) -> Option<ToolCall> {
        let id = self.id.unwrap_or_else(|| format!("call_{fallback_id}"));
        let name = self.name?;
        let arguments = if self.arguments.trim().is_empty() {
            "{}".to_string()
        } else {
            match serde_json::from_str::<serde_json::Value>(&self.arguments) {
                Ok(_) => self.arguments,
                Err(_) => repair_json(&self.arguments).unwrap_or_else(|| "{}".to_string()),
            }
        };
        Some(ToolCall {
            id,
            call_type: "function".to_string(),
            function: runtime_model::FunctionCall { name, arguments },
        })
    }
}

/// Best-effort repair for tool-call arguments that arrived as technically
/// invalid JSON (an unescaped control character, a trailing comma). Falls
/// back to `None` (caller substitutes `{}`) when the string still doesn't
/// parse after repair.
fn repair_json(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let fixed = trimmed.replace(",}", "}").replace(",]", "]");
    if serde_json::from_str::<serde_json::Value>(&fixed).is_ok() {
        return Some(fixed);
    }
    None
}

/// Consumes a provider's streaming chat-completion and reassembles the
/// result, publishing content/reasoning deltas as they arrive. Returns the
/// accumulated result plus the usage recorded this turn and the cost delta
/// (0.0 if no cost descriptor is available).
pub async fn process_stream(
    mut stream: ResponseStream,
    bus: &EventBus,
    cost_descriptor: Option<ModelCostDescriptor>,
) -> (StreamResult, Usage, f64) {
    let mut result = StreamResult::default();
    let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
    let mut order: Vec<u32> = Vec::new();
    let mut emitted_partial: HashSet<String> = HashSet::new();
    let mut turn_usage = Usage::default();
    let mut cost_delta = 0.0;

    while let Some(item) = stream.next().await {
        match item {
            Ok(ResponseEvent::TextDelta(delta)) => {
                bus.publish(Event::AgentChoice { delta: delta.clone() }).await;
                result.content.push_str(&delta);
            }
            Ok(ResponseEvent::ThinkingDelta(delta)) => {
                bus.publish(Event::AgentChoiceReasoning { delta: delta.clone() }).await;
                result.reasoning_content.push_str(&delta);
            }
            Ok(ResponseEvent::ToolCall { index, id, name, arguments }) => {
                let entry = pending.entry(index).or_insert_with(|| {
                    order.push(index);
                    PendingToolCall::default()
                });
                let mut just_learned_name = false;
                let mut just_received_arguments = false;
                if let Some(id) = id {
                    entry.id = Some(id);
                }
                if let Some(name) = name {
                    just_learned_name = entry.name.is_none();
                    entry.name = Some(name);
                }
                if let Some(arguments) = arguments {
                    just_received_arguments = entry.arguments.is_empty();
                    entry.arguments.push_str(&arguments);
                }
                if let Some(call_id) = entry.id.clone() {
                    if (just_learned_name || just_received_arguments) && emitted_partial.insert(call_id.clone())
                    {
                        bus.publish(Event::PartialToolCall { id: call_id }).await;
                    }
                }
            }
            Ok(ResponseEvent::Usage(usage)) => {
                turn_usage.input_tokens += usage.input_tokens;
                turn_usage.output_tokens += usage.output_tokens;
                turn_usage.cache_read_tokens += usage.cache_read_tokens;
                turn_usage.cache_write_tokens += usage.cache_write_tokens;
                if let Some(desc) = cost_descriptor {
                    cost_delta += desc.cost_for(&usage);
                }
            }
            Ok(ResponseEvent::Done) => {
                break;
            }
            Ok(ResponseEvent::Error(message)) => {
                result.error = Some(message);
                result.stopped = true;
                break;
            }
            Err(err) => {
                result.error = Some(err.to_string());
                result.stopped = true;
                break;
            }
        }
    }

    for (fallback_id, index) in order.into_iter().enumerate() {
        if let Some(pending_call) = pending.remove(&index) {
            if let Some(call) = pending_call.finish(fallback_id as u32) {
                result.tool_calls.push(call);
            }
        }
    }

    // Tool calls mean the turn loop must continue (dispatch them and call
    // the model again); their absence is what "stopped" actually signals,
    // regardless of how the stream terminated.
    if result.tool_calls.is_empty() {
        result.stopped = true;
    }

    (result, turn_usage, cost_delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn boxed(events: Vec<anyhow::Result<ResponseEvent>>) -> ResponseStream {
        Box::pin(stream::iter(events))
    }

    #[tokio::test]
    async fn fragmented_tool_call_arguments_reassemble_in_arrival_order() {
        let events = vec![
            Ok(ResponseEvent::ToolCall { index: 0, id: Some("c1".into()), name: Some("f".into()), arguments: None }),
            Ok(ResponseEvent::ToolCall { index: 0, id: None, name: None, arguments: Some("{\"k\":".into()) }),
            Ok(ResponseEvent::ToolCall { index: 0, id: None, name: None, arguments: Some("\"v\"}".into()) }),
            Ok(ResponseEvent::Done),
        ];
        let bus = EventBus::new();
        let (result, _, _) = process_stream(boxed(events), &bus, None).await;
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].function.arguments, "{\"k\":\"v\"}");
    }

    #[tokio::test]
    async fn exactly_one_partial_tool_call_event_is_emitted_per_id() {
        let events = vec![
            Ok(ResponseEvent::ToolCall { index: 0, id: Some("c1".into()), name: Some("f".into()), arguments: None }),
            Ok(ResponseEvent::ToolCall { index: 0, id: None, name: None, arguments: Some("{}".into()) }),
            Ok(ResponseEvent::Done),
        ];
        let bus = EventBus::new();
        let mut rx = bus.subscribe("t").await;
        process_stream(boxed(events), &bus, None).await;
        let mut partial_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::PartialToolCall { .. }) {
                partial_count += 1;
            }
        }
        assert_eq!(partial_count, 1);
    }

    #[tokio::test]
    async fn usage_accumulates_cost_from_descriptor() {
        let events = vec![
            Ok(ResponseEvent::Usage(Usage {
                input_tokens: 1_000_000,
                output_tokens: 0,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            })),
            Ok(ResponseEvent::TextDelta("hi".into())),
            Ok(ResponseEvent::Done),
        ];
        let bus = EventBus::new();
        let desc = ModelCostDescriptor {
            input_cost_per_million: 5.0,
            ..Default::default()
        };
        let (_, usage, cost) = process_stream(boxed(events), &bus, Some(desc)).await;
        assert_eq!(usage.input_tokens, 1_000_000);
        assert!((cost - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_stream_with_no_content_is_marked_stopped() {
        let events = vec![Ok(ResponseEvent::Done)];
        let bus = EventBus::new();
        let (result, _, _) = process_stream(boxed(events), &bus, None).await;
        assert!(result.stopped);
        assert!(result.content.is_empty());
    }

    #[test]
    fn classifies_a_nested_n_ctx_overflow_body_as_context_overflow() {
        let err = anyhow::anyhow!(
            r#"provider returned 400: {{"error":{{"type":"exceed_context_size_error","n_ctx":54272,"n_prompt_tokens":54298}}}}"#
        );
        match classify_stream_error(&err) {
            RuntimeError::ContextOverflow { limit } => assert_eq!(limit, 54272),
            other => panic!("expected ContextOverflow, got {other:?}"),
        }
    }

    #[test]
    fn classifies_a_flat_n_ctx_body_as_context_overflow() {
        let err = anyhow::anyhow!(r#"{{"n_ctx":8192}}"#);
        match classify_stream_error(&err) {
            RuntimeError::ContextOverflow { limit } => assert_eq!(limit, 8192),
            other => panic!("expected ContextOverflow, got {other:?}"),
        }
    }

    #[test]
    fn an_unrelated_error_is_classified_as_stream_open_failed() {
        let err = anyhow::anyhow!("connection reset by peer");
        match classify_stream_error(&err) {
            RuntimeError::StreamOpenFailed(message) => assert_eq!(message, "connection reset by peer"),
            other => panic!("expected StreamOpenFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_arguments_are_repaired_or_replaced_with_empty_object() {
        let events = vec![
            Ok(ResponseEvent::ToolCall {
                index: 0,
                id: Some("c1".into()),
                name: Some("f".into()),
                arguments: Some("{\"k\":\"v\",}".into()),
            }),
            Ok(ResponseEvent::Done),
        ];
        let bus = EventBus::new();
        let (result, _, _) = process_stream(boxed(events), &bus, None).await;
        assert_eq!(result.tool_calls[0].function.arguments, "{\"k\":\"v\"}");
    }
}
