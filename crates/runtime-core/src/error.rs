// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Internal, matchable error kinds. Converted to `anyhow::Error` at the
/// public API boundary so callers that don't need to branch on the kind can
/// keep using `?` freely.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("stream open failed: {0}")]
    StreamOpenFailed(String),
    #[error("context window exceeded: provider reports a hard limit of {limit} tokens")]
    ContextOverflow { limit: usize },
    #[error(transparent)]
    Store(#[from] runtime_store::StoreError),
}
