// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The serialised writer path: `append_event` and everything the log derives.
//!
//! All rows fanned out from a `message.created` event (message, inbox index,
//! recipient status, thread summaries) commit in the same transaction as the
//! event row, so observers never see a partial write.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{Error, Result};
use crate::model::{Event, EventKind, Message, RecipientStatus, ThreadSummary};

use super::Store;

/// Input to [`Store::append_event`]. The store assigns the cursor.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub project: String,
    pub agent: Option<String>,
    /// Resource-specific frame fields, persisted verbatim.
    pub payload: serde_json::Value,
    /// Present iff `kind` is `message.created`. Cursor/created_at on input
    /// are ignored and replaced by the log's.
    pub message: Option<Message>,
}

impl NewEvent {
    pub fn bare(kind: EventKind, project: impl Into<String>) -> Self {
        Self {
            kind,
            project: project.into(),
            agent: None,
            payload: serde_json::json!({}),
            message: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

pub(super) fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let to: Vec<String> = serde_json::from_str(&row.get::<String, _>("to_json"))
        .map_err(|e| Error::Internal(format!("corrupt to_json: {e}")))?;
    let cc: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("cc_json")).unwrap_or_default();
    let bcc: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("bcc_json")).unwrap_or_default();
    Ok(Message {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        project: row.get("project"),
        from: row.get("sender"),
        to,
        cc,
        bcc,
        subject: row.get("subject"),
        body: row.get("body"),
        importance: row.get("importance"),
        ack_required: row.get("ack_required"),
        created_at: row.get("created_at"),
        cursor: row.get::<i64, _>("cursor") as u64,
    })
}

fn event_from_row(row: &SqliteRow, message: Option<Message>) -> Result<Event> {
    let kind_str: String = row.get("kind");
    let kind = EventKind::parse(&kind_str)
        .ok_or_else(|| Error::Internal(format!("unknown event kind {kind_str:?}")))?;
    let payload = serde_json::from_str::<serde_json::Value>(&row.get::<String, _>("payload"))
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    Ok(Event {
        cursor: row.get::<i64, _>("cursor") as u64,
        id: row.get("id"),
        kind,
        project: row.get("project"),
        agent: row.get("agent"),
        message,
        created_at: row.get("created_at"),
        payload,
    })
}

fn thread_summary_from_row(row: &SqliteRow) -> ThreadSummary {
    ThreadSummary {
        project: row.get("project"),
        thread_id: row.get("thread_id"),
        agent: row.get("agent"),
        last_cursor: row.get::<i64, _>("last_cursor") as u64,
        message_count: row.get::<i64, _>("message_count") as u64,
        last_message_id: row.get("last_message_id"),
        last_from: row.get("last_sender"),
        last_subject: row.get("last_subject"),
        last_body: row.get("last_body"),
        last_created_at: row.get("last_created_at"),
    }
}

impl Store {
    /// Append one event to the log, fanning out derived rows for messages.
    /// Returns the stored event with its assigned cursor.
    pub async fn append_event(&self, new: NewEvent) -> Result<Event> {
        let created_at = Utc::now();
        let event_id = uuid::Uuid::new_v4().to_string();
        let message_id = new.message.as_ref().map(|m| m.id.clone());

        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO events (id, kind, project, agent, message_id, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event_id)
        .bind(new.kind.as_str())
        .bind(&new.project)
        .bind(&new.agent)
        .bind(&message_id)
        .bind(new.payload.to_string())
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        let cursor = inserted.last_insert_rowid();

        let message = match new.message {
            Some(mut msg) => {
                msg.cursor = cursor as u64;
                msg.created_at = created_at;
                msg.project.clone_from(&new.project);
                self.fan_out_message(&mut tx, &msg).await?;
                Some(msg)
            }
            None => None,
        };

        tx.commit().await?;

        Ok(Event {
            cursor: cursor as u64,
            id: event_id,
            kind: new.kind,
            project: new.project,
            agent: new.agent,
            message,
            created_at,
            payload: new.payload.as_object().cloned().unwrap_or_default(),
        })
    }

    /// Insert the message row plus inbox, status, and thread-summary rows.
    async fn fan_out_message(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        msg: &Message,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages
                 (project, id, thread_id, sender, to_json, cc_json, bcc_json,
                  subject, body, importance, ack_required, cursor, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (project, id) DO UPDATE SET
                 thread_id = excluded.thread_id,
                 sender = excluded.sender,
                 to_json = excluded.to_json,
                 cc_json = excluded.cc_json,
                 bcc_json = excluded.bcc_json,
                 subject = excluded.subject,
                 body = excluded.body,
                 importance = excluded.importance,
                 ack_required = excluded.ack_required,
                 cursor = excluded.cursor,
                 created_at = excluded.created_at",
        )
        .bind(&msg.project)
        .bind(&msg.id)
        .bind(&msg.thread_id)
        .bind(&msg.from)
        .bind(serde_json::to_string(&msg.to).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&msg.cc).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&msg.bcc).unwrap_or_else(|_| "[]".into()))
        .bind(&msg.subject)
        .bind(&msg.body)
        .bind(&msg.importance)
        .bind(msg.ack_required)
        .bind(msg.cursor as i64)
        .bind(msg.created_at)
        .execute(&mut **tx)
        .await?;

        for (recipient, kind) in msg.recipients() {
            sqlx::query(
                "INSERT OR IGNORE INTO inbox_index (project, agent, cursor, message_id)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&msg.project)
            .bind(recipient)
            .bind(msg.cursor as i64)
            .bind(&msg.id)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                "INSERT OR IGNORE INTO recipient_status
                     (project, message_id, agent_id, kind)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&msg.project)
            .bind(&msg.id)
            .bind(recipient)
            .bind(kind.as_str())
            .execute(&mut **tx)
            .await?;
        }

        if let Some(ref thread_id) = msg.thread_id {
            let mut participants: Vec<&str> = vec![msg.from.as_str()];
            participants.extend(msg.recipients().iter().map(|(r, _)| *r));
            participants.sort_unstable();
            participants.dedup();

            for agent in participants {
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
                .bind(&msg.project)
                .bind(thread_id)
                .bind(agent)
                .bind(msg.cursor as i64)
                .bind(&msg.id)
                .bind(&msg.from)
                .bind(&msg.subject)
                .bind(&msg.body)
                .bind(msg.created_at)
                .execute(&mut **tx)
                .await?;
            }
        }

        Ok(())
    }

    /// Messages for `agent` with cursors strictly greater than `cursor`,
    /// oldest first. An empty `project` matches every project the agent is
    /// indexed in.
    pub async fn inbox_since(
        &self,
        project: &str,
        agent: &str,
        cursor: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        let limit = i64::from(limit.unwrap_or(u32::MAX));
        let rows = sqlx::query(
            "SELECT m.* FROM inbox_index i
             JOIN messages m ON m.project = i.project AND m.id = i.message_id
             WHERE i.agent = ? AND i.cursor > ? AND (? = '' OR i.project = ?)
             ORDER BY i.cursor ASC LIMIT ?",
        )
        .bind(agent)
        .bind(cursor as i64)
        .bind(project)
        .bind(project)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Total and unread message counts for an agent's inbox.
    pub async fn inbox_counts(&self, project: &str, agent: &str) -> Result<(u64, u64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN read_at IS NULL THEN 1 ELSE 0 END), 0) AS unread
             FROM recipient_status
             WHERE agent_id = ? AND (? = '' OR project = ?)",
        )
        .bind(agent)
        .bind(project)
        .bind(project)
        .fetch_one(self.pool())
        .await?;
        Ok((row.get::<i64, _>("total") as u64, row.get::<i64, _>("unread") as u64))
    }

    /// Distinct messages in a thread with cursor strictly greater than
    /// `cursor`, in creation order.
    pub async fn thread_messages(
        &self,
        project: &str,
        thread_id: &str,
        cursor: u64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT DISTINCT * FROM messages
             WHERE project = ? AND thread_id = ? AND cursor > ?
             ORDER BY created_at ASC",
        )
        .bind(project)
        .bind(thread_id)
        .bind(cursor as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Thread summaries for an agent, newest first. This pages *backward*:
    /// pass `cursor = 0` for the first page, then the smallest `last_cursor`
    /// of the previous page to continue; rows with `last_cursor < cursor`
    /// are returned. (Inbox pagination pages forward; this one does not.)
    pub async fn list_threads(
        &self,
        project: &str,
        agent: &str,
        cursor: u64,
        limit: Option<u32>,
    ) -> Result<Vec<ThreadSummary>> {
        let limit = i64::from(limit.unwrap_or(u32::MAX));
        let rows = sqlx::query(
            "SELECT * FROM thread_index
             WHERE agent = ? AND (? = '' OR project = ?) AND (? = 0 OR last_cursor < ?)
             ORDER BY last_cursor DESC LIMIT ?",
        )
        .bind(agent)
        .bind(project)
        .bind(project)
        .bind(cursor as i64)
        .bind(cursor as i64)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(thread_summary_from_row).collect())
    }

    /// Forward transition of `read_at`. Idempotent: an existing timestamp is
    /// never overwritten and still reports success. Returns `NotRecipient`
    /// when the agent has no status row for the message.
    pub async fn mark_read(&self, project: &str, message_id: &str, agent_id: &str) -> Result<()> {
        self.mark_status_column("read_at", project, message_id, agent_id).await
    }

    /// Forward transition of `ack_at`, same contract as [`Store::mark_read`].
    pub async fn mark_ack(&self, project: &str, message_id: &str, agent_id: &str) -> Result<()> {
        self.mark_status_column("ack_at", project, message_id, agent_id).await
    }

    async fn mark_status_column(
        &self,
        column: &str,
        project: &str,
        message_id: &str,
        agent_id: &str,
    ) -> Result<()> {
        let updated = sqlx::query(&format!(
            "UPDATE recipient_status SET {column} = ?
             WHERE project = ? AND message_id = ? AND agent_id = ? AND {column} IS NULL"
        ))
        .bind(Utc::now())
        .bind(project)
        .bind(message_id)
        .bind(agent_id)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(());
        }

        // Zero rows: either already set (fine) or not a recipient at all.
        let exists = sqlx::query(
            "SELECT 1 FROM recipient_status
             WHERE project = ? AND message_id = ? AND agent_id = ?",
        )
        .bind(project)
        .bind(message_id)
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;
        if exists.is_some() {
            Ok(())
        } else {
            Err(Error::NotRecipient)
        }
    }

    /// Recipient statuses for one message.
    pub async fn recipient_statuses(
        &self,
        project: &str,
        message_id: &str,
    ) -> Result<Vec<RecipientStatus>> {
        let rows = sqlx::query(
            "SELECT * FROM recipient_status WHERE project = ? AND message_id = ?
             ORDER BY agent_id ASC",
        )
        .bind(project)
        .bind(message_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                let kind_str: String = row.get("kind");
                Ok(RecipientStatus {
                    project: row.get("project"),
                    message_id: row.get("message_id"),
                    agent_id: row.get("agent_id"),
                    kind: match kind_str.as_str() {
                        "cc" => crate::model::RecipientKind::Cc,
                        "bcc" => crate::model::RecipientKind::Bcc,
                        _ => crate::model::RecipientKind::To,
                    },
                    read_at: row.get::<Option<DateTime<Utc>>, _>("read_at"),
                    ack_at: row.get::<Option<DateTime<Utc>>, _>("ack_at"),
                })
            })
            .collect()
    }

    /// One message by id, or `NotFound`.
    pub async fn get_message(&self, project: &str, message_id: &str) -> Result<Message> {
        let row = sqlx::query("SELECT * FROM messages WHERE project = ? AND id = ?")
            .bind(project)
            .bind(message_id)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => message_from_row(&row),
            None => Err(Error::NotFound(format!("message {message_id}"))),
        }
    }

    /// The greatest cursor assigned so far; 0 for an empty log.
    pub async fn latest_cursor(&self) -> Result<u64> {
        let cursor: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(cursor), 0) FROM events")
            .fetch_one(self.pool())
            .await?;
        Ok(cursor as u64)
    }

    /// Raw events with cursor strictly greater than `cursor`, oldest first,
    /// with message payloads hydrated for `message.created` rows.
    pub async fn events_since(
        &self,
        project: &str,
        cursor: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Event>> {
        let limit = i64::from(limit.unwrap_or(u32::MAX));
        let rows = sqlx::query(
            "SELECT e.*, m.project AS m_project FROM events e
             LEFT JOIN messages m ON m.project = e.project AND m.id = e.message_id
             WHERE e.cursor > ? AND (? = '' OR e.project = ?)
             ORDER BY e.cursor ASC LIMIT ?",
        )
        .bind(cursor as i64)
        .bind(project)
        .bind(project)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = match row.get::<Option<String>, _>("message_id") {
                Some(ref mid) if row.get::<Option<String>, _>("m_project").is_some() => {
                    Some(self.get_message(row.get::<String, _>("project").as_str(), mid).await?)
                }
                _ => None,
            };
            events.push(event_from_row(row, message)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
