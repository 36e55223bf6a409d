// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Item, Session, SessionItem, SessionSummary};
use crate::error::StoreError;
use crate::store_trait::SessionStore;

/// Ephemeral, process-local backend. Sub-sessions are stored as ordinary
/// entries in the same map, keyed by their own id, and are reachable both
/// through a `SubSession` item on the parent and directly by id — matching
/// the disk backend's semantics.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn add_session(&self, session: Session) -> Result<(), StoreError> {
        if session.id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        self.sessions.lock().await.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.lock().await;
        let mut roots: Vec<Session> = sessions.values().filter(|s| s.parent_id.is_empty()).cloned().collect();
        roots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(roots)
    }

    async fn get_session_summaries(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.get_sessions().await?;
        Ok(sessions
            .into_iter()
            .map(|s| SessionSummary {
                id: s.id,
                title: s.title,
                created_at: s.created_at,
                starred: s.starred,
            })
            .collect())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let to_delete: Vec<String> = sessions
            .values()
            .filter(|s| s.id == id || s.parent_id == id)
            .map(|s| s.id.clone())
            .collect();
        for sid in to_delete {
            sessions.remove(&sid);
        }
        Ok(())
    }

    async fn update_session(&self, session: Session) -> Result<(), StoreError> {
        if session.id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        self.sessions.lock().await.insert(session.id.clone(), session);
        Ok(())
    }

    async fn set_session_starred(&self, id: &str, starred: bool) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        session.starred = starred;
        Ok(())
    }

    async fn add_item(&self, session_id: &str, item: Item) -> Result<String, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(""));
        if session.id.is_empty() {
            session.id = session_id.to_string();
        }
        let id = uuid::Uuid::new_v4().to_string();
        let position = session.items.len();
        session.items.push(SessionItem {
            id: id.clone(),
            position,
            payload: item,
        });
        Ok(id)
    }

    async fn update_item(&self, session_id: &str, item_id: &str, item: Item) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        let existing = session
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
        existing.payload = item;
        Ok(())
    }

    async fn get_items(&self, session_id: &str) -> Result<Vec<SessionItem>, StoreError> {
        let session = self.get_session(session_id).await?;
        Ok(session.items)
    }

    async fn add_sub_session(&self, parent_id: &str, mut child: Session) -> Result<String, StoreError> {
        let mut sessions = self.sessions.lock().await;
        if child.id.is_empty() {
            child.id = uuid::Uuid::new_v4().to_string();
        }
        child.parent_id = parent_id.to_string();
        let child_id = child.id.clone();

        let parent = sessions
            .get_mut(parent_id)
            .ok_or_else(|| StoreError::NotFound(parent_id.to_string()))?;
        let position = parent.items.len();
        parent.items.push(SessionItem {
            id: uuid::Uuid::new_v4().to_string(),
            position,
            payload: Item::SubSession(crate::domain::SubSessionRef {
                session_id: child_id.clone(),
            }),
        });

        sessions.insert(child_id.clone(), child);
        Ok(child_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_model::Role;

    #[tokio::test]
    async fn add_then_get_session_round_trips() {
        let store = InMemoryStore::new();
        let session = Session::new("/tmp");
        let id = session.id.clone();
        store.add_session(session.clone()).await.unwrap();
        let loaded = store.get_session(&id).await.unwrap();
        assert_eq!(loaded.id, session.id);
    }

    #[tokio::test]
    async fn add_session_with_empty_id_fails() {
        let store = InMemoryStore::new();
        let mut session = Session::new("/tmp");
        session.id.clear();
        let err = store.add_session(session).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyId));
    }

    #[tokio::test]
    async fn get_missing_session_fails_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_session("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_session_is_idempotent_upsert() {
        let store = InMemoryStore::new();
        let session = Session::new("/tmp");
        let id = session.id.clone();
        store.update_session(session.clone()).await.unwrap();
        store.update_session(session.clone()).await.unwrap();
        let loaded = store.get_session(&id).await.unwrap();
        assert_eq!(loaded.id, id);
    }

    #[tokio::test]
    async fn add_item_assigns_positions_densely_from_zero() {
        let store = InMemoryStore::new();
        let session = Session::new("/tmp");
        store.add_session(session.clone()).await.unwrap();
        store
            .add_item(
                &session.id,
                Item::Message(crate::domain::StoredMessage::new("root", Role::User, "hi")),
            )
            .await
            .unwrap();
        store
            .add_item(
                &session.id,
                Item::Message(crate::domain::StoredMessage::new("root", Role::Assistant, "hi there")),
            )
            .await
            .unwrap();
        let items = store.get_items(&session.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].position, 0);
        assert_eq!(items[1].position, 1);
    }

    #[tokio::test]
    async fn add_item_lazily_creates_minimal_session_row() {
        let store = InMemoryStore::new();
        let id = store
            .add_item(
                "lazy-session",
                Item::Message(crate::domain::StoredMessage::new("root", Role::User, "hi")),
            )
            .await
            .unwrap();
        assert!(!id.is_empty());
        let session = store.get_session("lazy-session").await.unwrap();
        assert_eq!(session.items.len(), 1);
    }

    #[tokio::test]
    async fn add_sub_session_links_parent_and_child() {
        let store = InMemoryStore::new();
        let parent = Session::new("/tmp");
        let parent_id = parent.id.clone();
        store.add_session(parent).await.unwrap();

        let child = Session::new("/tmp");
        let child_id = store.add_sub_session(&parent_id, child).await.unwrap();

        let loaded_child = store.get_session(&child_id).await.unwrap();
        assert_eq!(loaded_child.parent_id, parent_id);

        let loaded_parent = store.get_session(&parent_id).await.unwrap();
        assert_eq!(loaded_parent.items.len(), 1);
        match &loaded_parent.items[0].payload {
            Item::SubSession(r) => assert_eq!(r.session_id, child_id),
            other => panic!("expected SubSession item, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_session_cascades_to_sub_sessions() {
        let store = InMemoryStore::new();
        let parent = Session::new("/tmp");
        let parent_id = parent.id.clone();
        store.add_session(parent).await.unwrap();
        let child_id = store.add_sub_session(&parent_id, Session::new("/tmp")).await.unwrap();

        store.delete_session(&parent_id).await.unwrap();

        assert!(store.get_session(&parent_id).await.is_err());
        assert!(store.get_session(&child_id).await.is_err());
    }

    #[tokio::test]
    async fn get_sessions_excludes_sub_sessions_and_orders_newest_first() {
        let store = InMemoryStore::new();
        let mut first = Session::new("/tmp");
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let mut second = Session::new("/tmp");
        second.created_at = chrono::Utc::now();
        store.add_session(first.clone()).await.unwrap();
        store.add_session(second.clone()).await.unwrap();
        store.add_sub_session(&second.id, Session::new("/tmp")).await.unwrap();

        let roots = store.get_sessions().await.unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].id, second.id);
    }
}
