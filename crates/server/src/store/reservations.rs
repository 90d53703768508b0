// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace path reservations: glob-pattern claims with TTLs, conflict
//! arbitration against active reservations, and expiry sweeps.
//!
//! Conflict evaluation runs inside the write transaction on the single
//! writer connection, so enumerate-then-insert is atomic against concurrent
//! reservers: of N racing exclusive claims on overlapping patterns, exactly
//! one lands.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{ConflictInfo, Error, Result};
use crate::glob;
use crate::model::{Reservation, DEFAULT_RESERVATION_TTL_SECS};

use super::Store;

/// Input to [`Store::reserve`].
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub agent_id: String,
    pub project: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: Option<String>,
    /// Defaults to 30 minutes when `None`.
    pub ttl_secs: Option<i64>,
}

fn reservation_from_row(row: &SqliteRow) -> Reservation {
    Reservation {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        project: row.get("project"),
        path_pattern: row.get("path_pattern"),
        exclusive: row.get("exclusive"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        released_at: row.get("released_at"),
    }
}

/// Two reservations conflict iff their patterns overlap and either side is
/// exclusive. Shared∧shared is the only permitted overlap.
fn conflicts_with(existing: &Reservation, pattern: &str, exclusive: bool) -> Result<bool> {
    if !existing.exclusive && !exclusive {
        return Ok(false);
    }
    glob::overlap(&existing.path_pattern, pattern)
}

impl Store {
    /// Claim paths matching `path_pattern`. Returns the stored reservation,
    /// or `ReservationConflict` listing every active conflicting claim.
    pub async fn reserve(&self, new: NewReservation) -> Result<Reservation> {
        glob::validate_complexity(&new.path_pattern)?;

        let now = Utc::now();
        let ttl = Duration::seconds(new.ttl_secs.unwrap_or(DEFAULT_RESERVATION_TTL_SECS));
        let expires_at = now + ttl;

        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            "SELECT * FROM reservations
             WHERE project = ? AND released_at IS NULL AND expires_at > ?",
        )
        .bind(&new.project)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut conflicts = Vec::new();
        for row in &rows {
            let existing = reservation_from_row(row);
            if conflicts_with(&existing, &new.path_pattern, new.exclusive)? {
                conflicts.push(ConflictInfo {
                    pattern: existing.path_pattern,
                    held_by: existing.agent_id,
                });
            }
        }
        if !conflicts.is_empty() {
            return Err(Error::ReservationConflict(conflicts));
        }

        let reservation = Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: new.agent_id,
            project: new.project,
            path_pattern: new.path_pattern,
            exclusive: new.exclusive,
            reason: new.reason,
            created_at: now,
            expires_at,
            released_at: None,
        };
        sqlx::query(
            "INSERT INTO reservations
                 (id, agent_id, project, path_pattern, exclusive, reason,
                  created_at, expires_at, released_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(&reservation.id)
        .bind(&reservation.agent_id)
        .bind(&reservation.project)
        .bind(&reservation.path_pattern)
        .bind(reservation.exclusive)
        .bind(&reservation.reason)
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    /// Same predicate as [`Store::reserve`], without inserting.
    pub async fn check_conflicts(
        &self,
        project: &str,
        pattern: &str,
        exclusive: bool,
    ) -> Result<Vec<ConflictInfo>> {
        glob::validate_complexity(pattern)?;
        let active = self.active_reservations(project).await?;
        let mut conflicts = Vec::new();
        for existing in active {
            if conflicts_with(&existing, pattern, exclusive)? {
                conflicts.push(ConflictInfo {
                    pattern: existing.path_pattern,
                    held_by: existing.agent_id,
                });
            }
        }
        Ok(conflicts)
    }

    /// Release a reservation. Only the owning agent may release; a mismatch
    /// is `ForbiddenOwner`, a missing row is `NotFound`.
    pub async fn release_reservation(&self, id: &str, agent_id: &str) -> Result<Reservation> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM reservations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(Error::NotFound(format!("reservation {id}")));
        };
        let mut reservation = reservation_from_row(&row);
        if reservation.agent_id != agent_id {
            return Err(Error::ForbiddenOwner(format!(
                "reservation {id} is held by {}",
                reservation.agent_id
            )));
        }

        let released_at = reservation.released_at.unwrap_or_else(Utc::now);
        sqlx::query("UPDATE reservations SET released_at = COALESCE(released_at, ?) WHERE id = ?")
            .bind(released_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        reservation.released_at = Some(released_at);
        Ok(reservation)
    }

    /// One reservation by id, or `NotFound`.
    pub async fn get_reservation(&self, id: &str) -> Result<Reservation> {
        let row = sqlx::query("SELECT * FROM reservations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| reservation_from_row(&r))
            .ok_or_else(|| Error::NotFound(format!("reservation {id}")))
    }

    /// Unreleased, unexpired reservations in a project.
    pub async fn active_reservations(&self, project: &str) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT * FROM reservations
             WHERE project = ? AND released_at IS NULL AND expires_at > ?
             ORDER BY created_at ASC",
        )
        .bind(project)
        .bind(Utc::now())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(reservation_from_row).collect())
    }

    /// Active reservations held by one agent, across projects.
    pub async fn agent_reservations(&self, agent_id: &str) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT * FROM reservations
             WHERE agent_id = ? AND released_at IS NULL AND expires_at > ?
             ORDER BY created_at ASC",
        )
        .bind(agent_id)
        .bind(Utc::now())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(reservation_from_row).collect())
    }

    /// Reclaim reservations that expired before `expired_before`, or whose
    /// owning agent was last seen before `heartbeat_after` (including agents
    /// that no longer exist). Returns the swept rows.
    pub async fn sweep_expired(
        &self,
        expired_before: DateTime<Utc>,
        heartbeat_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reservation>> {
        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            "SELECT r.* FROM reservations r
             LEFT JOIN agents a ON a.id = r.agent_id
             WHERE r.released_at IS NULL
               AND (r.expires_at < ?
                    OR (? IS NOT NULL AND (a.last_seen IS NULL OR a.last_seen < ?)))",
        )
        .bind(expired_before)
        .bind(heartbeat_after)
        .bind(heartbeat_after)
        .fetch_all(&mut *tx)
        .await?;
        let swept: Vec<Reservation> = rows.iter().map(reservation_from_row).collect();

        let now = Utc::now();
        for r in &swept {
            sqlx::query("UPDATE reservations SET released_at = ? WHERE id = ?")
                .bind(now)
                .bind(&r.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(swept)
    }
}

#[cfg(test)]
#[path = "reservations_tests.rs"]
mod tests;
