// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Input modalities a model accepts, used to gate image attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    Text,
    Image,
}

/// Per-category pricing for a model, expressed in USD per million tokens.
/// Feeds the stream processor's cost accumulation (input, output, cached
/// read, and cache write are billed at different rates by most providers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCostDescriptor {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    pub cache_read_cost_per_million: f64,
    pub cache_write_cost_per_million: f64,
}

impl ModelCostDescriptor {
    /// Cost in USD for one usage record, accumulated as
    /// `sum(tokens * rate) / 1_000_000` per the token-accounting note.
    pub fn cost_for(&self, usage: &crate::types::Usage) -> f64 {
        let micro_dollars = usage.input_tokens as f64 * self.input_cost_per_million
            + usage.output_tokens as f64 * self.output_cost_per_million
            + usage.cache_read_tokens as f64 * self.cache_read_cost_per_million
            + usage.cache_write_tokens as f64 * self.cache_write_cost_per_million;
        micro_dollars / 1_000_000.0
    }
}

/// Static catalog entry: context window, output cap, and cost descriptor for
/// one provider/model pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub provider: String,
    pub context_window: usize,
    pub max_output_tokens: usize,
    pub input_modalities: Vec<InputModality>,
    #[serde(default)]
    pub cost: Option<ModelCostDescriptor>,
}
