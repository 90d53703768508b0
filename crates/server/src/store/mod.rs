// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable state: a single-writer SQLite file holding the append-only event
//! log and everything derived from it (inbox indices, thread summaries,
//! recipient statuses), plus agents, reservations, and domain entities.
//!
//! One pool, one connection. SQLite's own transaction discipline makes every
//! enumerate-then-insert sequence atomic against other writers, and the
//! short busy timeout surfaces contention as `database is locked` for the
//! retry layer to absorb.

pub mod agents;
pub mod domain;
pub mod events;
pub mod migrate;
pub mod reservations;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// Handle to the backing database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path`, switch it to WAL mode, and
    /// apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(100))
            .foreign_keys(false);
        Self::open_with(opts).await
    }

    /// Open an in-memory database. Tests only — identical code paths, no file.
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(false);
        Self::open_with(opts).await
    }

    async fn open_with(opts: SqliteConnectOptions) -> Result<Self> {
        // One connection, kept forever: the single-writer discipline and the
        // lifetime of in-memory test databases both depend on it.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        migrate::run(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. SQLite checkpoints the WAL on the final disconnect.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
