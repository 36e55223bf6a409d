// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::watch;

/// A single cancellation signal threaded from the top-level `RunStream` call
/// into every subsystem it touches (stream read, tool approval wait,
/// elicitation wait, nested sub-session). Built on `watch` rather than a
/// `oneshot` because it must be cloned into a spawned child driver task when
/// a sub-session opens.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; never resolves otherwise. Meant
    /// for use as one arm of a `tokio::select!`.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel_is_called() {
        let (handle, mut token) = CancelHandle::new();
        assert!(!token.is_cancelled());
        handle.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cloned_tokens_observe_the_same_cancellation() {
        let (handle, token) = CancelHandle::new();
        let mut clone = token.clone();
        handle.cancel();
        clone.cancelled().await;
        assert!(token.is_cancelled());
    }
}
