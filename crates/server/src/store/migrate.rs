// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idempotent schema setup and in-place migrations.
//!
//! Every open runs the same checks: create missing tables, rebuild legacy
//! tables that predate project partitioning (rename-create-copy-drop inside
//! one transaction), add late message metadata columns, and backfill thread
//! summaries once from historical messages.

use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// Current schema. `IF NOT EXISTS` keeps this safe to run on every open.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        cursor INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        kind TEXT NOT NULL,
        project TEXT NOT NULL DEFAULT '',
        agent TEXT,
        message_id TEXT,
        payload TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        project TEXT NOT NULL DEFAULT '',
        id TEXT NOT NULL,
        thread_id TEXT,
        sender TEXT NOT NULL,
        to_json TEXT NOT NULL DEFAULT '[]',
        cc_json TEXT NOT NULL DEFAULT '[]',
        bcc_json TEXT NOT NULL DEFAULT '[]',
        subject TEXT,
        body TEXT NOT NULL DEFAULT '',
        importance TEXT,
        ack_required INTEGER NOT NULL DEFAULT 0,
        cursor INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS inbox_index (
        project TEXT NOT NULL DEFAULT '',
        agent TEXT NOT NULL,
        cursor INTEGER NOT NULL,
        message_id TEXT NOT NULL,
        PRIMARY KEY (project, agent, cursor)
    )",
    "CREATE TABLE IF NOT EXISTS recipient_status (
        project TEXT NOT NULL DEFAULT '',
        message_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'to',
        read_at TEXT,
        ack_at TEXT,
        PRIMARY KEY (project, message_id, agent_id)
    )",
    "CREATE TABLE IF NOT EXISTS thread_index (
        project TEXT NOT NULL DEFAULT '',
        thread_id TEXT NOT NULL,
        agent TEXT NOT NULL,
        last_cursor INTEGER NOT NULL DEFAULT 0,
        message_count INTEGER NOT NULL DEFAULT 0,
        last_message_id TEXT,
        last_sender TEXT,
        last_subject TEXT,
        last_body TEXT,
        last_created_at TEXT,
        PRIMARY KEY (project, thread_id, agent)
    )",
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        project TEXT NOT NULL DEFAULT '',
        capabilities TEXT NOT NULL DEFAULT '[]',
        metadata TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'online',
        created_at TEXT NOT NULL,
        last_seen TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS reservations (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        project TEXT NOT NULL DEFAULT '',
        path_pattern TEXT NOT NULL,
        exclusive INTEGER NOT NULL DEFAULT 1,
        reason TEXT,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        released_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS specs (
        project TEXT NOT NULL, id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '', description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'draft', version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS epics (
        project TEXT NOT NULL, id TEXT NOT NULL, spec_id TEXT,
        title TEXT NOT NULL DEFAULT '', description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'draft', version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS stories (
        project TEXT NOT NULL, id TEXT NOT NULL, epic_id TEXT,
        title TEXT NOT NULL DEFAULT '', description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'draft', version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS tasks (
        project TEXT NOT NULL, id TEXT NOT NULL, story_id TEXT,
        title TEXT NOT NULL DEFAULT '', description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'todo', assignee TEXT,
        version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS insights (
        project TEXT NOT NULL, id TEXT NOT NULL, spec_id TEXT,
        title TEXT NOT NULL DEFAULT '', body TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        project TEXT NOT NULL, id TEXT NOT NULL, agent_id TEXT,
        name TEXT NOT NULL DEFAULT '', status TEXT NOT NULL DEFAULT 'running',
        started_at TEXT NOT NULL, stopped_at TEXT,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS cujs (
        project TEXT NOT NULL, id TEXT NOT NULL, spec_id TEXT,
        title TEXT NOT NULL DEFAULT '', description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'draft', version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
        PRIMARY KEY (project, id)
    )",
    "CREATE TABLE IF NOT EXISTS cuj_feature_links (
        project TEXT NOT NULL, cuj_id TEXT NOT NULL, feature_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (project, cuj_id, feature_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_project_cursor ON events (project, cursor)",
    "CREATE INDEX IF NOT EXISTS idx_inbox_agent_cursor ON inbox_index (agent, cursor)",
    "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages (project, thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_reservations_project ON reservations (project)",
    "CREATE INDEX IF NOT EXISTS idx_agents_session ON agents (session_id)",
];

/// Run all schema checks and migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    rebuild_legacy_messages(pool).await?;
    rebuild_legacy_inbox(pool).await?;

    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }

    add_missing_message_columns(pool).await?;
    backfill_thread_index(pool).await?;
    Ok(())
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(table)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn table_has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})")).fetch_all(pool).await?;
    Ok(rows.iter().any(|r| r.get::<String, _>("name") == column))
}

/// Whether the table's primary key is exactly (project, <second>).
async fn has_composite_project_pk(pool: &SqlitePool, table: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})")).fetch_all(pool).await?;
    let mut pk_cols: Vec<(i64, String)> = rows
        .iter()
        .filter(|r| r.get::<i64, _>("pk") > 0)
        .map(|r| (r.get::<i64, _>("pk"), r.get::<String, _>("name")))
        .collect();
    pk_cols.sort();
    Ok(pk_cols.len() >= 2 && pk_cols[0].1 == "project")
}

/// Rebuild a pre-partitioning `messages` table: add `project` (defaulting to
/// the empty string) and the composite primary key.
async fn rebuild_legacy_messages(pool: &SqlitePool) -> Result<()> {
    if !table_exists(pool, "messages").await? {
        return Ok(());
    }
    let has_project = table_has_column(pool, "messages", "project").await?;
    if has_project && has_composite_project_pk(pool, "messages").await? {
        return Ok(());
    }

    tracing::info!("migrating legacy messages table to project partitioning");
    let mut tx = pool.begin().await?;
    sqlx::query("ALTER TABLE messages RENAME TO messages_legacy").execute(&mut *tx).await?;
    sqlx::query(
        "CREATE TABLE messages (
            project TEXT NOT NULL DEFAULT '',
            id TEXT NOT NULL,
            thread_id TEXT,
            sender TEXT NOT NULL,
            to_json TEXT NOT NULL DEFAULT '[]',
            cc_json TEXT NOT NULL DEFAULT '[]',
            bcc_json TEXT NOT NULL DEFAULT '[]',
            subject TEXT,
            body TEXT NOT NULL DEFAULT '',
            importance TEXT,
            ack_required INTEGER NOT NULL DEFAULT 0,
            cursor INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (project, id)
        )",
    )
    .execute(&mut *tx)
    .await?;

    let project_expr = if has_project { "project" } else { "''" };
    // Only columns the legacy table is guaranteed to have; late metadata
    // columns are filled by add_missing_message_columns afterwards.
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO messages
             (project, id, thread_id, sender, to_json, body, cursor, created_at)
         SELECT {project_expr}, id, thread_id, sender, to_json, body, cursor, created_at
         FROM messages_legacy"
    ))
    .execute(&mut *tx)
    .await?;
    sqlx::query("DROP TABLE messages_legacy").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Rebuild a pre-partitioning `inbox_index` table the same way.
async fn rebuild_legacy_inbox(pool: &SqlitePool) -> Result<()> {
    if !table_exists(pool, "inbox_index").await?
        || table_has_column(pool, "inbox_index", "project").await?
    {
        return Ok(());
    }

    tracing::info!("migrating legacy inbox_index table to project partitioning");
    let mut tx = pool.begin().await?;
    sqlx::query("ALTER TABLE inbox_index RENAME TO inbox_index_legacy").execute(&mut *tx).await?;
    sqlx::query(
        "CREATE TABLE inbox_index (
            project TEXT NOT NULL DEFAULT '',
            agent TEXT NOT NULL,
            cursor INTEGER NOT NULL,
            message_id TEXT NOT NULL,
            PRIMARY KEY (project, agent, cursor)
        )",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT OR IGNORE INTO inbox_index (project, agent, cursor, message_id)
         SELECT '', agent, cursor, message_id FROM inbox_index_legacy",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("DROP TABLE inbox_index_legacy").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Add message metadata columns that older stores lack.
async fn add_missing_message_columns(pool: &SqlitePool) -> Result<()> {
    const LATE_COLUMNS: &[(&str, &str)] = &[
        ("cc_json", "TEXT NOT NULL DEFAULT '[]'"),
        ("bcc_json", "TEXT NOT NULL DEFAULT '[]'"),
        ("subject", "TEXT"),
        ("importance", "TEXT"),
        ("ack_required", "INTEGER NOT NULL DEFAULT 0"),
    ];
    for (name, decl) in LATE_COLUMNS {
        if !table_has_column(pool, "messages", name).await? {
            sqlx::query(&format!("ALTER TABLE messages ADD COLUMN {name} {decl}"))
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

/// One-shot backfill of thread summaries from historical messages. Keyed on
/// the table being empty so a second run is a no-op.
async fn backfill_thread_index(pool: &SqlitePool) -> Result<()> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM thread_index").fetch_one(pool).await?;
    if count > 0 {
        return Ok(());
    }
    let messages: Vec<(String, String, String, String, String, String, String, Option<String>, String, i64, String)> =
        sqlx::query_as(
            "SELECT project, id, thread_id, sender, to_json, cc_json, bcc_json,
                    subject, body, cursor, created_at
             FROM messages WHERE thread_id IS NOT NULL ORDER BY cursor ASC",
        )
        .fetch_all(pool)
        .await?;
    if messages.is_empty() {
        return Ok(());
    }

    tracing::info!(count = messages.len(), "backfilling thread summaries");
    let mut tx = pool.begin().await?;
    for (project, id, thread_id, sender, to_json, cc_json, bcc_json, subject, body, cursor, created_at) in
        &messages
    {
        let mut participants: Vec<String> = vec![sender.clone()];
        for json in [to_json, cc_json, bcc_json] {
            let list: Vec<String> = serde_json::from_str(json).unwrap_or_default();
            participants.extend(list);
        }
        participants.sort();
        participants.dedup();

        for agent in &participants {
            sqlx::query(
                "INSERT INTO thread_index
                     (project, thread_id, agent, last_cursor, message_count,
                      last_message_id, last_sender, last_subject, last_body, last_created_at)
                 VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
                 ON CONFLICT (project, thread_id, agent) DO UPDATE SET
                     last_cursor = excluded.last_cursor,
                     message_count = thread_index.message_count + 1,
                     last_message_id = excluded.last_message_id,
                     last_sender = excluded.last_sender,
                     last_subject = excluded.last_subject,
                     last_body = excluded.last_body,
                     last_created_at = excluded.last_created_at",
            )
            .bind(project)
            .bind(thread_id)
            .bind(agent)
            .bind(cursor)
            .bind(id)
            .bind(sender)
            .bind(subject)
            .bind(body)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
#[path = "migrate_tests.rs"]
mod tests;
