// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use runtime_eventbus::{Event, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

/// The user's disposition toward an elicitation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitationAction {
    Accept,
    Decline,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct ElicitationResult {
    pub action: ElicitationAction,
    pub content: Option<Value>,
}

#[derive(Debug, Error)]
pub enum ElicitationError {
    #[error("no handler is waiting for a response")]
    NoHandlerWaiting,
}

/// Point-to-point rendezvous used when a tool asks the user a structured
/// question mid-execution. Single-slot by design: at most one elicitation is
/// outstanding per runtime at any time.
pub struct ElicitationBroker {
    bus: Arc<EventBus>,
    pending: Mutex<Option<oneshot::Sender<ElicitationResult>>>,
}

impl ElicitationBroker {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(ElicitationBroker {
            bus,
            pending: Mutex::new(None),
        })
    }

    /// Publishes an `ElicitationRequest` event and blocks until either a
    /// response arrives via [`Self::resume`] or `cancel` resolves — whichever
    /// comes first. On cancellation the pending slot is cleared so a late
    /// `resume` call (if any) fails with `NoHandlerWaiting` instead of
    /// delivering a stale answer.
    pub async fn handle(
        &self,
        prompt: impl Into<String>,
        cancel: impl std::future::Future<Output = ()>,
    ) -> ElicitationResult {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);

        self.bus
            .publish(Event::ElicitationRequest {
                id: id.clone(),
                prompt: prompt.into(),
            })
            .await;

        tokio::select! {
            result = rx => result.unwrap_or(ElicitationResult {
                action: ElicitationAction::Cancel,
                content: None,
            }),
            _ = cancel => {
                *self.pending.lock().await = None;
                ElicitationResult { action: ElicitationAction::Cancel, content: None }
            }
        }
    }

    /// Non-blocking: delivers a response to whoever is waiting. Fails if no
    /// handler is currently blocked in [`Self::handle`].
    pub async fn resume(&self, action: ElicitationAction, content: Option<Value>) -> Result<(), ElicitationError> {
        let sender = self.pending.lock().await.take();
        match sender {
            Some(tx) => {
                let _ = tx.send(ElicitationResult { action, content });
                Ok(())
            }
            None => Err(ElicitationError::NoHandlerWaiting),
        }
    }
}
