// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use runtime_model::{Role, ToolCall};
use tokio::sync::Mutex;

use crate::domain::{
    Item, Permissions, Session, SessionItem, SessionSummary, StoredMessage, SubSessionRef, Summary,
    ToolDefinition,
};
use crate::error::StoreError;
use crate::migrations::MIGRATIONS;
use crate::store_trait::SessionStore;

/// Disk-backed, transactional session store. Normalized schema: sessions,
/// position-keyed items, 1:1 messages, message parts, tool calls, and
/// content-hash-deduplicated tool definitions (see `migrations.rs`).
///
/// Calls take the connection mutex for their duration; rusqlite is
/// synchronous, so each call briefly occupies the async worker thread it
/// runs on. Acceptable for the write volume a single conversation session
/// produces.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        run_migrations(&conn)?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }
}

fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY);",
    )?;
    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |r| r.get(0))
        .unwrap_or(0);
    for (version, sql) in MIGRATIONS {
        if *version > current {
            conn.execute_batch(sql)?;
            conn.execute("INSERT INTO schema_migrations(version) VALUES (?1)", params![version])?;
        }
    }
    Ok(())
}

fn bool_to_i64(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}

fn row_to_session_meta(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let permissions_json: String = row.get("permissions")?;
    let overrides_json: String = row.get("agent_model_overrides")?;
    let custom_models_json: String = row.get("custom_models_used")?;
    let created_at: String = row.get("created_at")?;
    Ok(Session {
        id: row.get("id")?,
        title: row.get("title")?,
        created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        working_dir: row.get("working_dir")?,
        items: Vec::new(),
        input_tokens: row.get::<_, i64>("input_tokens")? as u64,
        output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        cost: row.get("cost")?,
        tools_approved: row.get::<_, i64>("tools_approved")? != 0,
        thinking: row.get::<_, i64>("thinking")? != 0,
        send_user_message: row.get::<_, i64>("send_user_message")? != 0,
        max_iterations: row.get::<_, i64>("max_iterations")? as usize,
        permissions: serde_json::from_str::<Permissions>(&permissions_json).unwrap_or_default(),
        agent_model_overrides: serde_json::from_str::<HashMap<String, String>>(&overrides_json)
            .unwrap_or_default(),
        custom_models_used: serde_json::from_str::<HashSet<String>>(&custom_models_json).unwrap_or_default(),
        parent_id: row.get("parent_id")?,
        starred: row.get::<_, i64>("starred")? != 0,
    })
}

impl SqliteStore {
    fn insert_session_row(conn: &Connection, session: &Session) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO sessions (id, title, created_at, working_dir, input_tokens, output_tokens, cost,
                tools_approved, thinking, send_user_message, max_iterations, permissions,
                agent_model_overrides, custom_models_used, parent_id, starred)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
             ON CONFLICT(id) DO UPDATE SET
                title=excluded.title, working_dir=excluded.working_dir,
                input_tokens=excluded.input_tokens, output_tokens=excluded.output_tokens,
                cost=excluded.cost, tools_approved=excluded.tools_approved,
                thinking=excluded.thinking, send_user_message=excluded.send_user_message,
                max_iterations=excluded.max_iterations, permissions=excluded.permissions,
                agent_model_overrides=excluded.agent_model_overrides,
                custom_models_used=excluded.custom_models_used,
                parent_id=excluded.parent_id, starred=excluded.starred",
            params![
                session.id,
                session.title,
                session.created_at.to_rfc3339(),
                session.working_dir,
                session.input_tokens as i64,
                session.output_tokens as i64,
                session.cost,
                bool_to_i64(session.tools_approved),
                bool_to_i64(session.thinking),
                bool_to_i64(session.send_user_message),
                session.max_iterations as i64,
                serde_json::to_string(&session.permissions).unwrap_or_default(),
                serde_json::to_string(&session.agent_model_overrides).unwrap_or_default(),
                serde_json::to_string(&session.custom_models_used).unwrap_or_default(),
                session.parent_id,
                bool_to_i64(session.starred),
            ],
        )?;
        Ok(())
    }

    fn insert_item_row(
        conn: &Connection,
        session_id: &str,
        item_id: &str,
        position: usize,
        item: &Item,
    ) -> rusqlite::Result<()> {
        let kind = match item {
            Item::Message(_) => "message",
            Item::Summary(_) => "summary",
            Item::SubSession(_) => "subsession",
        };
        conn.execute(
            "INSERT INTO session_items (id, session_id, position, kind) VALUES (?1,?2,?3,?4)
             ON CONFLICT(id) DO UPDATE SET position=excluded.position, kind=excluded.kind",
            params![item_id, session_id, position as i64, kind],
        )?;
        match item {
            Item::Message(m) => Self::insert_message_row(conn, item_id, m)?,
            Item::Summary(s) => {
                conn.execute(
                    "INSERT INTO summaries (item_id, text, created_at) VALUES (?1,?2,?3)
                     ON CONFLICT(item_id) DO UPDATE SET text=excluded.text",
                    params![item_id, s.text, s.created_at.to_rfc3339()],
                )?;
            }
            Item::SubSession(r) => {
                conn.execute(
                    "INSERT INTO sub_session_refs (item_id, child_session_id) VALUES (?1,?2)
                     ON CONFLICT(item_id) DO UPDATE SET child_session_id=excluded.child_session_id",
                    params![item_id, r.session_id],
                )?;
            }
        }
        Ok(())
    }

    fn insert_message_row(conn: &Connection, item_id: &str, m: &StoredMessage) -> rusqlite::Result<()> {
        let role = serde_json::to_string(&m.role).unwrap_or_default();
        conn.execute(
            "INSERT INTO messages (item_id, agent_name, implicit, role, content, reasoning_content,
                tool_call_id, usage_input, usage_output, usage_cache_read, usage_cache_write, cost,
                created_at, cache_control)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(item_id) DO UPDATE SET content=excluded.content, cost=excluded.cost",
            params![
                item_id,
                m.agent_name,
                bool_to_i64(m.implicit),
                role,
                m.content,
                m.reasoning_content,
                m.tool_call_id,
                m.usage.input_tokens as i64,
                m.usage.output_tokens as i64,
                m.usage.cache_read_tokens as i64,
                m.usage.cache_write_tokens as i64,
                m.cost,
                m.created_at.to_rfc3339(),
                m.cache_control,
            ],
        )?;
        conn.execute("DELETE FROM message_parts WHERE item_id = ?1", params![item_id])?;
        for (idx, part) in m.multi_content.iter().enumerate() {
            conn.execute(
                "INSERT INTO message_parts (item_id, idx, part_json) VALUES (?1,?2,?3)",
                params![item_id, idx as i64, serde_json::to_string(part).unwrap_or_default()],
            )?;
        }
        conn.execute("DELETE FROM message_tool_calls WHERE item_id = ?1", params![item_id])?;
        for (idx, call) in m.tool_calls.iter().enumerate() {
            conn.execute(
                "INSERT INTO message_tool_calls (item_id, idx, call_json) VALUES (?1,?2,?3)",
                params![item_id, idx as i64, serde_json::to_string(call).unwrap_or_default()],
            )?;
        }
        conn.execute("DELETE FROM message_tool_definitions WHERE item_id = ?1", params![item_id])?;
        for def in &m.tool_definitions {
            let hash = def.content_hash();
            conn.execute(
                "INSERT INTO tool_definitions (hash, definition_json) VALUES (?1,?2)
                 ON CONFLICT(hash) DO NOTHING",
                params![hash, serde_json::to_string(def).unwrap_or_default()],
            )?;
            conn.execute(
                "INSERT INTO message_tool_definitions (item_id, hash) VALUES (?1,?2)
                 ON CONFLICT(item_id, hash) DO NOTHING",
                params![item_id, hash],
            )?;
        }
        Ok(())
    }

    fn load_items(conn: &Connection, session_id: &str) -> rusqlite::Result<Vec<SessionItem>> {
        let mut stmt = conn.prepare(
            "SELECT id, position, kind FROM session_items WHERE session_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>("id")?,
                row.get::<_, i64>("position")? as usize,
                row.get::<_, String>("kind")?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (item_id, position, kind) = row?;
            let payload = match kind.as_str() {
                "message" => Item::Message(Self::load_message(conn, &item_id)?),
                "summary" => {
                    let (text, created_at): (String, String) = conn.query_row(
                        "SELECT text, created_at FROM summaries WHERE item_id = ?1",
                        params![item_id],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )?;
                    Item::Summary(Summary {
                        text,
                        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    })
                }
                "subsession" => {
                    let child_id: String = conn.query_row(
                        "SELECT child_session_id FROM sub_session_refs WHERE item_id = ?1",
                        params![item_id],
                        |r| r.get(0),
                    )?;
                    Item::SubSession(SubSessionRef { session_id: child_id })
                }
                other => panic!("unknown item kind in storage: {other}"),
            };
            items.push(SessionItem {
                id: item_id,
                position,
                payload,
            });
        }
        Ok(items)
    }

    fn load_message(conn: &Connection, item_id: &str) -> rusqlite::Result<StoredMessage> {
        let row = conn.query_row(
            "SELECT agent_name, implicit, role, content, reasoning_content, tool_call_id,
                    usage_input, usage_output, usage_cache_read, usage_cache_write, cost,
                    created_at, cache_control
             FROM messages WHERE item_id = ?1",
            params![item_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)? != 0,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, i64>(8)?,
                    r.get::<_, i64>(9)?,
                    r.get::<_, f64>(10)?,
                    r.get::<_, String>(11)?,
                    r.get::<_, Option<String>>(12)?,
                ))
            },
        )?;
        let (
            agent_name,
            implicit,
            role_json,
            content,
            reasoning_content,
            tool_call_id,
            usage_input,
            usage_output,
            usage_cache_read,
            usage_cache_write,
            cost,
            created_at,
            cache_control,
        ) = row;

        let mut parts_stmt = conn.prepare(
            "SELECT part_json FROM message_parts WHERE item_id = ?1 ORDER BY idx ASC",
        )?;
        let multi_content = parts_stmt
            .query_map(params![item_id], |r| r.get::<_, String>(0))?
            .filter_map(|s| s.ok())
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();

        let mut calls_stmt = conn.prepare(
            "SELECT call_json FROM message_tool_calls WHERE item_id = ?1 ORDER BY idx ASC",
        )?;
        let tool_calls: Vec<ToolCall> = calls_stmt
            .query_map(params![item_id], |r| r.get::<_, String>(0))?
            .filter_map(|s| s.ok())
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();

        let mut defs_stmt = conn.prepare(
            "SELECT td.definition_json FROM message_tool_definitions mtd
             JOIN tool_definitions td ON td.hash = mtd.hash
             WHERE mtd.item_id = ?1",
        )?;
        let tool_definitions: Vec<ToolDefinition> = defs_stmt
            .query_map(params![item_id], |r| r.get::<_, String>(0))?
            .filter_map(|s| s.ok())
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();

        Ok(StoredMessage {
            agent_name,
            implicit,
            role: serde_json::from_str(&role_json).unwrap_or(Role::User),
            content,
            multi_content,
            reasoning_content,
            tool_calls,
            tool_call_id,
            tool_definitions,
            usage: runtime_model::Usage {
                input_tokens: usage_input as u64,
                output_tokens: usage_output as u64,
                cache_read_tokens: usage_cache_read as u64,
                cache_write_tokens: usage_cache_write as u64,
            },
            cost,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            cache_control,
        })
    }

    fn load_session_with_items(conn: &Connection, id: &str) -> Result<Session, StoreError> {
        let mut session = conn
            .query_row("SELECT * FROM sessions WHERE id = ?1", params![id], row_to_session_meta)
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        session.items = Self::load_items(conn, id).map_err(|e| StoreError::Backend(e.into()))?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn add_session(&self, session: Session) -> Result<(), StoreError> {
        if session.id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        let conn = self.conn.lock().await;
        Self::insert_session_row(&conn, &session).map_err(|e| StoreError::Backend(e.into()))?;
        for item in &session.items {
            Self::insert_item_row(&conn, &session.id, &item.id, item.position, &item.payload)
                .map_err(|e| StoreError::Backend(e.into()))?;
        }
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        let conn = self.conn.lock().await;
        Self::load_session_with_items(&conn, id)
    }

    async fn get_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE parent_id = '' ORDER BY created_at DESC")
            .map_err(|e| StoreError::Backend(e.into()))?;
        let metas: Vec<Session> = stmt
            .query_map([], row_to_session_meta)
            .map_err(|e| StoreError::Backend(e.into()))?
            .filter_map(|r| r.ok())
            .collect();
        let mut sessions = Vec::with_capacity(metas.len());
        for mut s in metas {
            s.items = Self::load_items(&conn, &s.id).map_err(|e| StoreError::Backend(e.into()))?;
            sessions.push(s);
        }
        Ok(sessions)
    }

    async fn get_session_summaries(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at, starred FROM sessions WHERE parent_id = ''
                 ORDER BY created_at DESC",
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        let rows = stmt
            .query_map([], |row| {
                let created_at: String = row.get(2)?;
                Ok(SessionSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    starred: row.get::<_, i64>(3)? != 0,
                })
            })
            .map_err(|e| StoreError::Backend(e.into()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM sessions WHERE id = ?1 OR parent_id = ?1", params![id])
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn update_session(&self, session: Session) -> Result<(), StoreError> {
        if session.id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        let conn = self.conn.lock().await;
        Self::insert_session_row(&conn, &session).map_err(|e| StoreError::Backend(e.into()))?;

        // Reconcile the full item list against the session's, not just by id:
        // a compaction can replace the item occupying a position with a fresh
        // id (a new summary), which an id-keyed upsert would leave standing
        // alongside the newly inserted row. Clearing every existing row for
        // the session first makes the insert loop authoritative.
        conn.execute("DELETE FROM session_items WHERE session_id = ?1", params![session.id])
            .map_err(|e| StoreError::Backend(e.into()))?;
        for item in &session.items {
            Self::insert_item_row(&conn, &session.id, &item.id, item.position, &item.payload)
                .map_err(|e| StoreError::Backend(e.into()))?;
        }
        Ok(())
    }

    async fn set_session_starred(&self, id: &str, starred: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE sessions SET starred = ?1 WHERE id = ?2",
                params![bool_to_i64(starred), id],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn add_item(&self, session_id: &str, item: Item) -> Result<String, StoreError> {
        let conn = self.conn.lock().await;
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![session_id],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?
            .unwrap_or(false);
        if !exists {
            let minimal = Session::new("");
            let mut minimal = minimal;
            minimal.id = session_id.to_string();
            Self::insert_session_row(&conn, &minimal).map_err(|e| StoreError::Backend(e.into()))?;
        }
        let position: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM session_items WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        let item_id = uuid::Uuid::new_v4().to_string();
        Self::insert_item_row(&conn, session_id, &item_id, position as usize, &item)
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(item_id)
    }

    async fn update_item(&self, _session_id: &str, item_id: &str, item: Item) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let (session_id, position): (String, i64) = conn
            .query_row(
                "SELECT session_id, position FROM session_items WHERE id = ?1",
                params![item_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
        Self::insert_item_row(&conn, &session_id, item_id, position as usize, &item)
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn get_items(&self, session_id: &str) -> Result<Vec<SessionItem>, StoreError> {
        let conn = self.conn.lock().await;
        Self::load_items(&conn, session_id).map_err(|e| StoreError::Backend(e.into()))
    }

    async fn add_sub_session(&self, parent_id: &str, mut child: Session) -> Result<String, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| StoreError::Backend(e.into()))?;

        if child.id.is_empty() {
            child.id = uuid::Uuid::new_v4().to_string();
        }
        child.parent_id = parent_id.to_string();

        let parent_exists: bool = tx
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![parent_id], |_| Ok(true))
            .optional()
            .map_err(|e| StoreError::Backend(e.into()))?
            .unwrap_or(false);
        if !parent_exists {
            return Err(StoreError::NotFound(parent_id.to_string()));
        }

        Self::insert_session_row(&tx, &child).map_err(|e| StoreError::Backend(e.into()))?;

        let position: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM session_items WHERE session_id = ?1",
                params![parent_id],
                |r| r.get(0),
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
        let ref_item_id = uuid::Uuid::new_v4().to_string();
        Self::insert_item_row(
            &tx,
            parent_id,
            &ref_item_id,
            position as usize,
            &Item::SubSession(SubSessionRef {
                session_id: child.id.clone(),
            }),
        )
        .map_err(|e| StoreError::Backend(e.into()))?;

        for item in &child.items {
            Self::insert_item_row(&tx, &child.id, &item.id, item.position, &item.payload)
                .map_err(|e| StoreError::Backend(e.into()))?;
        }

        tx.commit().map_err(|e| StoreError::Backend(e.into()))?;
        Ok(child.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_model::Role;

    #[tokio::test]
    async fn add_then_get_session_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session::new("/tmp");
        let id = session.id.clone();
        store.add_session(session).await.unwrap();
        let loaded = store.get_session(&id).await.unwrap();
        assert_eq!(loaded.id, id);
    }

    #[tokio::test]
    async fn add_item_then_get_items_preserves_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session::new("/tmp");
        store.add_session(session.clone()).await.unwrap();
        store
            .add_item(&session.id, Item::Message(StoredMessage::new("root", Role::User, "1")))
            .await
            .unwrap();
        store
            .add_item(
                &session.id,
                Item::Message(StoredMessage::new("root", Role::Assistant, "2")),
            )
            .await
            .unwrap();
        let items = store.get_items(&session.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].position, 0);
        assert_eq!(items[1].position, 1);
    }

    #[tokio::test]
    async fn update_session_twice_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut session = Session::new("/tmp");
        session.push_message(StoredMessage::new("root", Role::User, "hi"));
        store.update_session(session.clone()).await.unwrap();
        store.update_session(session.clone()).await.unwrap();
        let loaded = store.get_session(&session.id).await.unwrap();
        assert_eq!(loaded.items.len(), 1);
    }

    #[tokio::test]
    async fn update_session_trims_items_beyond_new_length() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut session = Session::new("/tmp");
        session.push_message(StoredMessage::new("root", Role::User, "1"));
        session.push_message(StoredMessage::new("root", Role::Assistant, "2"));
        store.update_session(session.clone()).await.unwrap();

        session.items.truncate(1);
        store.update_session(session.clone()).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap();
        assert_eq!(loaded.items.len(), 1);
    }

    #[tokio::test]
    async fn tool_definitions_are_deduplicated_by_content_hash() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session::new("/tmp");
        store.add_session(session.clone()).await.unwrap();

        let def = ToolDefinition {
            name: "list_files".into(),
            category: "fs".into(),
            description: "lists files".into(),
            parameters: serde_json::json!({"type": "object"}),
            annotations: runtime_tools::ToolAnnotations {
                read_only_hint: true,
                ..Default::default()
            },
            output_schema: None,
        };
        let mut m1 = StoredMessage::new("root", Role::Assistant, "");
        m1.tool_definitions.push(def.clone());
        let mut m2 = StoredMessage::new("root", Role::Assistant, "");
        m2.tool_definitions.push(def.clone());

        store.add_item(&session.id, Item::Message(m1)).await.unwrap();
        store.add_item(&session.id, Item::Message(m2)).await.unwrap();

        let conn = store.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tool_definitions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn add_sub_session_is_transactional_and_links_parent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let parent = Session::new("/tmp");
        store.add_session(parent.clone()).await.unwrap();

        let child_id = store.add_sub_session(&parent.id, Session::new("/tmp")).await.unwrap();
        let loaded_child = store.get_session(&child_id).await.unwrap();
        assert_eq!(loaded_child.parent_id, parent.id);

        let loaded_parent = store.get_session(&parent.id).await.unwrap();
        assert_eq!(loaded_parent.items.len(), 1);
    }

    #[tokio::test]
    async fn delete_session_cascades_to_items_and_sub_sessions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let parent = Session::new("/tmp");
        store.add_session(parent.clone()).await.unwrap();
        store
            .add_item(&parent.id, Item::Message(StoredMessage::new("root", Role::User, "hi")))
            .await
            .unwrap();
        let child_id = store.add_sub_session(&parent.id, Session::new("/tmp")).await.unwrap();

        store.delete_session(&parent.id).await.unwrap();

        assert!(store.get_session(&parent.id).await.is_err());
        assert!(store.get_session(&child_id).await.is_err());
    }
}
