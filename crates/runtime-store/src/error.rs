// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session id must not be empty")]
    EmptyId,
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("item not found: {0}")]
    ItemNotFound(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
