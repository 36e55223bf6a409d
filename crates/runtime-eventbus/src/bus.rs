// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::event::Event;

/// Per-subscriber queue depth. A slow subscriber drops events rather than
/// stalling every other subscriber and the publisher.
pub const SUBSCRIBER_BUFFER: usize = 128;

/// Non-blocking multi-subscriber fan-out of [`Event`]s.
///
/// Safe for concurrent publish/subscribe: the subscriber table is guarded by
/// a reader-writer lock, so publishing (which only needs read access to the
/// table to hand off into each subscriber's own channel) never contends with
/// other publishers, only with subscribe/unsubscribe/close.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, mpsc::Sender<Event>>>,
    closed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus {
            subscribers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(EventBus::default())
    }

    /// Re-subscribing with the same id does not hand back the previously
    /// issued receiver — `mpsc::Receiver` has a single owner and cannot be
    /// cloned or reattached, so there is no value to return. Instead a fresh
    /// channel is created and the new sender replaces the old one in the
    /// subscriber table; the prior receiver is left in place but orphaned
    /// (its sender is gone, so it observes a closed channel on its next
    /// poll). After `close()`, returns an already-closed channel.
    pub async fn subscribe(&self, id: impl Into<String>) -> mpsc::Receiver<Event> {
        let id = id.into();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if self.closed.load(Ordering::SeqCst) {
            // Return a channel whose sender is immediately dropped, so the
            // receiver observes a closed channel on the very next poll.
            return rx;
        }
        self.subscribers.write().await.insert(id, tx);
        rx
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.subscribers.write().await.remove(id);
    }

    /// Non-blocking: delivers to every subscriber via `try_send`. A full
    /// subscriber buffer drops the event for that subscriber only; the
    /// publisher never blocks and other subscribers are unaffected.
    pub async fn publish(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let subscribers = self.subscribers.read().await;
        for (id, tx) in subscribers.iter() {
            if let Err(err) = tx.try_send(event.clone()) {
                warn!(subscriber_id = %id, error = %err, "dropping event for slow subscriber");
            }
        }
    }

    /// Blocking variant: awaits capacity in every subscriber's channel.
    /// Only appropriate where back-pressure is tolerable, such as a test
    /// harness that wants to observe every event.
    pub async fn publish_sync(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let subscribers = self.subscribers.read().await;
        for tx in subscribers.values() {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Idempotent: closes every subscriber channel and marks the bus closed.
    /// Subsequent `publish` is a no-op; subsequent `subscribe` returns an
    /// already-closed channel.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscribers.write().await.clear();
    }
}
