// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use runtime_eventbus::{Event, EventBus};
use runtime_model::{CompletionRequest, Message, ModelProvider, Role};
use runtime_store::domain::{Item, Session, SessionItem, StoredMessage, Summary};

use crate::stream::process_stream;

const SUMMARIZE_PROMPT: &str =
    "Summarize the following conversation in a concise, information-dense way. Preserve \
     technical details, decisions, file names, and tool outputs that may matter for future \
     work. This summary will replace the original history.";

/// Canned notice prepended to the kept tail when compaction falls back to
/// the deterministic path because no model call succeeded.
const EMERGENCY_NOTICE: &str =
    "[Context emergency-compacted: earlier conversation history was dropped without \
     summarization because compaction could not reach the model.]";

pub const DEFAULT_EMERGENCY_KEEP_N: usize = 10;

/// Runs an LLM-driven compaction pass over every user/assistant message
/// (system messages omitted), replaces the session's history with a single
/// `Summary` item, and emits the accompanying events. Falls back to
/// [`emergency_compact`] if the summarization call itself fails or returns
/// no content — compaction must never leave the session untouched and over
/// budget.
pub async fn compact_session(model: &dyn ModelProvider, session: &mut Session, bus: &EventBus) -> anyhow::Result<()> {
    let transcript_text = {
        let transcript: Vec<&StoredMessage> = session
            .messages()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .collect();

        if transcript.is_empty() {
            bus.publish(Event::Warning {
                message: "nothing to compact: session has no user or assistant messages".to_string(),
            })
            .await;
            return Ok(());
        }

        transcript
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    bus.publish(Event::SessionCompactionStarted { session_id: session.id.clone() }).await;

    let request = CompletionRequest {
        messages: vec![Message::user(format!("{SUMMARIZE_PROMPT}\n\n{transcript_text}"))],
        tools: Vec::new(),
        stream: true,
    };

    let summary_text = match model.complete(request).await {
        Ok(stream) => {
            // A private, unsubscribed bus: the summarizer's own content
            // deltas are not part of the conversation the user is watching.
            let scratch_bus = EventBus::new();
            let (result, _usage, _cost) = process_stream(stream, &scratch_bus, None).await;
            result.content
        }
        Err(_) => String::new(),
    };

    if summary_text.is_empty() {
        emergency_compact(session, DEFAULT_EMERGENCY_KEEP_N);
        bus.publish(Event::SessionCompactionCompleted { session_id: session.id.clone() }).await;
        return Ok(());
    }

    session.items.clear();
    session.items.push(SessionItem {
        id: uuid::Uuid::new_v4().to_string(),
        position: 0,
        payload: Item::Summary(Summary { text: summary_text.clone(), created_at: chrono::Utc::now() }),
    });

    bus.publish(Event::SessionCompactionCompleted { session_id: session.id.clone() }).await;
    bus.publish(Event::SessionSummary { session_id: session.id.clone(), summary: summary_text }).await;

    Ok(())
}

/// Deterministic fallback: no model call, drops all items except the
/// trailing `keep_n` non-system messages and prepends a canned notice so the
/// conversation records *that* context was lost rather than silently
/// continuing as if nothing happened.
pub fn emergency_compact(session: &mut Session, keep_n: usize) {
    let mut kept: Vec<StoredMessage> = session
        .messages()
        .filter(|m| m.role != Role::System)
        .rev()
        .take(keep_n)
        .cloned()
        .collect();
    kept.reverse();

    session.items.clear();
    session.push_message(StoredMessage::new("root", Role::Assistant, EMERGENCY_NOTICE));
    for message in kept {
        session.push_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_model::ScriptedMockProvider;

    #[tokio::test]
    async fn empty_session_skips_compaction_with_a_warning() {
        let mut session = Session::new("/tmp");
        let bus = EventBus::new();
        let mut rx = bus.subscribe("t").await;
        let model = ScriptedMockProvider::always_text("m", "summary");

        compact_session(&model, &mut session, &bus).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, Event::Warning { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn successful_compaction_replaces_history_with_one_summary_item() {
        let mut session = Session::new("/tmp");
        session.push_message(StoredMessage::new("root", Role::User, "what's 2+2"));
        session.push_message(StoredMessage::new("root", Role::Assistant, "4"));
        let bus = EventBus::new();
        let model = ScriptedMockProvider::always_text("m", "the user asked about arithmetic");

        compact_session(&model, &mut session, &bus).await.unwrap();

        assert_eq!(session.items.len(), 1);
        assert!(matches!(&session.items[0].payload, Item::Summary(_)));
    }

    #[tokio::test]
    async fn failed_model_call_falls_back_to_emergency_compact() {
        let mut session = Session::new("/tmp");
        session.push_message(StoredMessage::new("root", Role::User, "hello"));
        session.push_message(StoredMessage::new("root", Role::Assistant, "hi"));
        let bus = EventBus::new();
        // An exhausted ScriptedMockProvider yields a `ResponseEvent::Error`
        // with no content, which compact_session treats as a failed call.
        let model = ScriptedMockProvider::new("m", vec![]);

        compact_session(&model, &mut session, &bus).await.unwrap();

        let messages: Vec<_> = session.messages().collect();
        assert_eq!(messages[0].content, EMERGENCY_NOTICE);
    }

    #[test]
    fn emergency_compact_keeps_only_the_trailing_n_non_system_messages() {
        let mut session = Session::new("/tmp");
        session.push_message(StoredMessage::new("root", Role::System, "sys"));
        for i in 0..5 {
            session.push_message(StoredMessage::new("root", Role::User, format!("msg {i}")));
        }
        emergency_compact(&mut session, 2);
        let messages: Vec<_> = session.messages().collect();
        assert_eq!(messages.len(), 3); // notice + trailing 2
        assert_eq!(messages[0].content, EMERGENCY_NOTICE);
        assert_eq!(messages[1].content, "msg 3");
        assert_eq!(messages[2].content, "msg 4");
    }
}
