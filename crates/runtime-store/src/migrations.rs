// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

/// Version-numbered, idempotent schema migrations, applied under a single
/// transaction at `open()` time. Each entry runs only if its version is
/// greater than the value currently recorded in `schema_migrations`.
pub const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id                      TEXT PRIMARY KEY,
            title                   TEXT NOT NULL DEFAULT '',
            created_at              TEXT NOT NULL,
            working_dir             TEXT NOT NULL DEFAULT '',
            input_tokens            INTEGER NOT NULL DEFAULT 0,
            output_tokens           INTEGER NOT NULL DEFAULT 0,
            cost                    REAL NOT NULL DEFAULT 0.0,
            tools_approved          INTEGER NOT NULL DEFAULT 0,
            thinking                INTEGER NOT NULL DEFAULT 0,
            send_user_message       INTEGER NOT NULL DEFAULT 1,
            max_iterations          INTEGER NOT NULL DEFAULT 0,
            permissions             TEXT NOT NULL DEFAULT '{}',
            agent_model_overrides   TEXT NOT NULL DEFAULT '{}',
            custom_models_used      TEXT NOT NULL DEFAULT '[]',
            parent_id               TEXT NOT NULL DEFAULT '',
            starred                 INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS session_items (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            kind        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_session_items_session ON session_items(session_id, position);

        CREATE TABLE IF NOT EXISTS messages (
            item_id             TEXT PRIMARY KEY REFERENCES session_items(id) ON DELETE CASCADE,
            agent_name          TEXT NOT NULL DEFAULT '',
            implicit            INTEGER NOT NULL DEFAULT 0,
            role                TEXT NOT NULL,
            content             TEXT NOT NULL DEFAULT '',
            reasoning_content   TEXT,
            tool_call_id        TEXT,
            usage_input         INTEGER NOT NULL DEFAULT 0,
            usage_output        INTEGER NOT NULL DEFAULT 0,
            usage_cache_read    INTEGER NOT NULL DEFAULT 0,
            usage_cache_write   INTEGER NOT NULL DEFAULT 0,
            cost                REAL NOT NULL DEFAULT 0.0,
            created_at          TEXT NOT NULL,
            cache_control       TEXT
        );

        CREATE TABLE IF NOT EXISTS message_parts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id     TEXT NOT NULL REFERENCES messages(item_id) ON DELETE CASCADE,
            idx         INTEGER NOT NULL,
            part_json   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_tool_calls (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id     TEXT NOT NULL REFERENCES messages(item_id) ON DELETE CASCADE,
            idx         INTEGER NOT NULL,
            call_json   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tool_definitions (
            hash             TEXT PRIMARY KEY,
            definition_json  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_tool_definitions (
            item_id   TEXT NOT NULL REFERENCES messages(item_id) ON DELETE CASCADE,
            hash      TEXT NOT NULL REFERENCES tool_definitions(hash),
            PRIMARY KEY (item_id, hash)
        );

        CREATE TABLE IF NOT EXISTS summaries (
            item_id     TEXT PRIMARY KEY REFERENCES session_items(id) ON DELETE CASCADE,
            text        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sub_session_refs (
            item_id            TEXT PRIMARY KEY REFERENCES session_items(id) ON DELETE CASCADE,
            child_session_id   TEXT NOT NULL
        );
        "#,
    ),
];
