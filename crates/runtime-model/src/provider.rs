// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::catalog::ModelCostDescriptor;
use crate::types::{CompletionRequest, ResponseEvent};

/// A demultiplexable stream of response deltas. Errors surfaced through the
/// stream (rather than as a top-level `Result`) so the processor can still
/// react to partial progress made before the failure.
pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Inbound dependency: something capable of opening a streaming chat
/// completion. Concrete adapters (OpenAI, Anthropic, …) live outside this
/// crate; only the trait boundary is defined here.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Maximum output tokens this model will produce in one turn.
    fn max_tokens(&self) -> usize {
        4096
    }

    /// Total context window, used for the 90%-threshold compaction check.
    fn context_limit(&self) -> Option<usize> {
        None
    }

    /// Per-token-category pricing, used for cost accumulation.
    fn cost_descriptor(&self) -> Option<ModelCostDescriptor> {
        None
    }

    /// Returns a provider bound to the same backend but with overridden
    /// generation options (used by title generation and compaction, which
    /// both need a cheaper/shorter-output variant of the active model).
    fn clone_with_options(&self, options: CloneOptions) -> Box<dyn ModelProvider>;
}

/// Options accepted by `ModelProvider::clone_with_options`.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub max_tokens: Option<usize>,
    pub structured_output: Option<bool>,
}
