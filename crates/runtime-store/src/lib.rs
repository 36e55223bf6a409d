// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

pub mod domain;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store_trait;

pub use domain::{
    Item, Permissions, Session, SessionItem, SessionSummary, StoredMessage, SubSessionRef, Summary,
    ToolDefinition,
};
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store_trait::SessionStore;
