// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::domain::{Item, Session, SessionItem, SessionSummary};
use crate::error::StoreError;

/// Durable, normalized persistence of sessions, items, and messages. Two
/// backends satisfy this contract identically: an in-memory map (tests,
/// ephemeral use) and a disk-backed transactional store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert. Fails with `EmptyId` if `session.id` is empty.
    async fn add_session(&self, session: Session) -> Result<(), StoreError>;

    /// Load session metadata plus all items, recursively loading
    /// sub-sessions. Fails `NotFound` if absent.
    async fn get_session(&self, id: &str) -> Result<Session, StoreError>;

    /// Enumerate all root sessions (`parent_id` empty), most-recent first,
    /// items included.
    async fn get_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Lightweight metadata only, ordered by creation time descending.
    async fn get_session_summaries(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// Cascade delete: items, messages, and sub-sessions go with it.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Upsert: insert if absent, replace all mutable columns if present.
    /// Items are reconciled: items at positions >= len(session.items) are
    /// deleted; items in range are inserted or updated in place.
    async fn update_session(&self, session: Session) -> Result<(), StoreError>;

    async fn set_session_starred(&self, id: &str, starred: bool) -> Result<(), StoreError>;

    /// Append at the next position; item id is generated if empty. Lazily
    /// creates a minimal session row if one does not exist yet. Returns the
    /// item's id.
    async fn add_item(&self, session_id: &str, item: Item) -> Result<String, StoreError>;

    /// Replace payload for `item_id`; position unchanged.
    async fn update_item(&self, session_id: &str, item_id: &str, item: Item) -> Result<(), StoreError>;

    /// Ordered by position ascending.
    async fn get_items(&self, session_id: &str) -> Result<Vec<SessionItem>, StoreError>;

    /// In a single transaction: insert `child` (assigning an id if empty),
    /// set `child.parent_id = parent_id`, append a SubSession reference item
    /// to the parent, then insert any items already present on `child`.
    /// Returns the child's id.
    async fn add_sub_session(&self, parent_id: &str, child: Session) -> Result<String, StoreError>;
}
