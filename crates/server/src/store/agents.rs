// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: registration with session-conflict detection, heartbeats,
//! and metadata merges.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{Error, Result};
use crate::model::{Agent, SESSION_STALE_THRESHOLD_SECS};

use super::Store;

fn agent_from_row(row: &SqliteRow) -> Agent {
    let capabilities: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("capabilities")).unwrap_or_default();
    let metadata: HashMap<String, String> =
        serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or_default();
    Agent {
        id: row.get("id"),
        session_id: row.get("session_id"),
        name: row.get("name"),
        project: row.get("project"),
        capabilities,
        metadata,
        status: row.get("status"),
        created_at: row.get("created_at"),
        last_seen: row.get("last_seen"),
    }
}

impl Store {
    /// Register (or re-register) an agent, keyed on `id`.
    ///
    /// If a *different* agent holds the same `session_id` and was seen within
    /// the stale threshold, registration fails with `ActiveSessionConflict`.
    /// A stale holder is simply superseded: its record stays but the session
    /// id now points at the new agent.
    pub async fn register_agent(&self, agent: &Agent) -> Result<Agent> {
        let now = Utc::now();
        let stale_before = now - Duration::seconds(SESSION_STALE_THRESHOLD_SECS);

        let mut tx = self.pool().begin().await?;

        let live_holder = sqlx::query(
            "SELECT id FROM agents WHERE session_id = ? AND id != ? AND last_seen > ?",
        )
        .bind(&agent.session_id)
        .bind(&agent.id)
        .bind(stale_before)
        .fetch_optional(&mut *tx)
        .await?;
        if live_holder.is_some() {
            return Err(Error::ActiveSessionConflict);
        }

        sqlx::query(
            "INSERT INTO agents
                 (id, session_id, name, project, capabilities, metadata, status,
                  created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 session_id = excluded.session_id,
                 name = excluded.name,
                 project = excluded.project,
                 capabilities = excluded.capabilities,
                 metadata = excluded.metadata,
                 status = excluded.status,
                 last_seen = excluded.last_seen",
        )
        .bind(&agent.id)
        .bind(&agent.session_id)
        .bind(&agent.name)
        .bind(&agent.project)
        .bind(serde_json::to_string(&agent.capabilities).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&agent.metadata).unwrap_or_else(|_| "{}".into()))
        .bind(&agent.status)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_agent(&agent.id).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => Ok(agent_from_row(&row)),
            None => Err(Error::NotFound(format!("agent {id}"))),
        }
    }

    /// List agents, optionally filtered by project and by capability.
    pub async fn list_agents(
        &self,
        project: Option<&str>,
        capability: Option<&str>,
    ) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT * FROM agents WHERE (? IS NULL OR project = ?) ORDER BY last_seen DESC",
        )
        .bind(project)
        .bind(project)
        .fetch_all(self.pool())
        .await?;
        let mut agents: Vec<Agent> = rows.iter().map(agent_from_row).collect();
        if let Some(cap) = capability {
            agents.retain(|a| a.capabilities.iter().any(|c| c == cap));
        }
        Ok(agents)
    }

    /// Advance `last_seen`. A non-empty `project` scopes the touch: a key
    /// authorised for one project cannot heartbeat another project's agent,
    /// and the mismatch surfaces as `NotFound` rather than `Forbidden`.
    pub async fn heartbeat(&self, project: &str, agent_id: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE agents SET last_seen = ? WHERE id = ? AND (? = '' OR project = ?)",
        )
        .bind(Utc::now())
        .bind(agent_id)
        .bind(project)
        .bind(project)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("agent {agent_id}")));
        }
        Ok(())
    }

    /// PATCH semantics: incoming keys overwrite, absent keys survive.
    pub async fn update_agent_metadata(
        &self,
        project: &str,
        agent_id: &str,
        patch: &HashMap<String, String>,
    ) -> Result<Agent> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "SELECT metadata FROM agents WHERE id = ? AND (? = '' OR project = ?)",
        )
        .bind(agent_id)
        .bind(project)
        .bind(project)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(Error::NotFound(format!("agent {agent_id}")));
        };

        let mut metadata: HashMap<String, String> =
            serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or_default();
        for (k, v) in patch {
            metadata.insert(k.clone(), v.clone());
        }

        sqlx::query("UPDATE agents SET metadata = ? WHERE id = ?")
            .bind(serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".into()))
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_agent(agent_id).await
    }
}

#[cfg(test)]
#[path = "agents_tests.rs"]
mod tests;
