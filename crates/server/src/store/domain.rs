// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain entity CRUD: specs, epics, stories, tasks, insights, sessions,
//! and CUJs, each keyed by `(project, id)`.
//!
//! Versioned entities update with `WHERE version = ?` and bump the version on
//! success; zero rows affected means either a concurrent writer won
//! (`VersionConflict`) or the row never existed (`NotFound`). Foreign keys
//! between entities are informational — deletes do not cascade, except that
//! removing a CUJ drops its feature links.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{Error, Result};
use crate::model::{Cuj, Epic, Insight, Spec, Story, Task, WorkSession};

use super::Store;

// -- Patches -------------------------------------------------------------------

/// Partial update for a versioned entity; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    /// Parent reference: spec_id / epic_id / story_id depending on entity.
    pub parent_id: Option<String>,
    /// Tasks only.
    pub assignee: Option<String>,
    /// Expected current version for the compare-and-swap.
    pub version: u64,
}

/// Partial update for an insight (unversioned).
#[derive(Debug, Clone, Default)]
pub struct InsightPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub spec_id: Option<String>,
}

/// Partial update for a session (unversioned).
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub name: Option<String>,
    pub status: Option<String>,
}

// -- Row mapping ---------------------------------------------------------------

fn spec_from_row(row: &SqliteRow) -> Spec {
    Spec {
        id: row.get("id"),
        project: row.get("project"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        version: row.get::<i64, _>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn epic_from_row(row: &SqliteRow) -> Epic {
    Epic {
        id: row.get("id"),
        project: row.get("project"),
        spec_id: row.get("spec_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        version: row.get::<i64, _>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn story_from_row(row: &SqliteRow) -> Story {
    Story {
        id: row.get("id"),
        project: row.get("project"),
        epic_id: row.get("epic_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        version: row.get::<i64, _>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn task_from_row(row: &SqliteRow) -> Task {
    Task {
        id: row.get("id"),
        project: row.get("project"),
        story_id: row.get("story_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        assignee: row.get("assignee"),
        version: row.get::<i64, _>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn insight_from_row(row: &SqliteRow) -> Insight {
    Insight {
        id: row.get("id"),
        project: row.get("project"),
        spec_id: row.get("spec_id"),
        title: row.get("title"),
        body: row.get("body"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn session_from_row(row: &SqliteRow) -> WorkSession {
    WorkSession {
        id: row.get("id"),
        project: row.get("project"),
        agent_id: row.get("agent_id"),
        name: row.get("name"),
        status: row.get("status"),
        started_at: row.get("started_at"),
        stopped_at: row.get("stopped_at"),
    }
}

fn cuj_from_row(row: &SqliteRow) -> Cuj {
    Cuj {
        id: row.get("id"),
        project: row.get("project"),
        spec_id: row.get("spec_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        version: row.get::<i64, _>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// -- Shared helpers ------------------------------------------------------------

impl Store {
    /// Distinguish a version miss from a missing row after a guarded update
    /// affected zero rows.
    async fn versioned_miss(&self, table: &str, project: &str, id: &str) -> Error {
        let exists = sqlx::query(&format!("SELECT 1 FROM {table} WHERE project = ? AND id = ?"))
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await;
        match exists {
            Ok(Some(_)) => Error::VersionConflict,
            Ok(None) => Error::NotFound(format!("{} {id}", table.trim_end_matches('s'))),
            Err(e) => Error::Storage(e),
        }
    }

    async fn delete_row(&self, table: &str, project: &str, id: &str) -> Result<()> {
        let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE project = ? AND id = ?"))
            .bind(project)
            .bind(id)
            .execute(self.pool())
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{} {id}", table.trim_end_matches('s'))));
        }
        Ok(())
    }
}

// -- Specs ---------------------------------------------------------------------

impl Store {
    pub async fn create_spec(&self, spec: &Spec) -> Result<Spec> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO specs (project, id, title, description, status, version,
                                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&spec.project)
        .bind(&spec.id)
        .bind(&spec.title)
        .bind(&spec.description)
        .bind(&spec.status)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_spec(&spec.project, &spec.id).await
    }

    pub async fn get_spec(&self, project: &str, id: &str) -> Result<Spec> {
        let row = sqlx::query("SELECT * FROM specs WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| spec_from_row(&r)).ok_or_else(|| Error::NotFound(format!("spec {id}")))
    }

    pub async fn list_specs(&self, project: &str) -> Result<Vec<Spec>> {
        let rows = sqlx::query("SELECT * FROM specs WHERE project = ? ORDER BY created_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(spec_from_row).collect())
    }

    pub async fn update_spec(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Spec> {
        let updated = sqlx::query(
            "UPDATE specs SET
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 status = COALESCE(?, status),
                 version = version + 1,
                 updated_at = ?
             WHERE project = ? AND id = ? AND version = ?",
        )
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.status)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .bind(patch.version as i64)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.versioned_miss("specs", project, id).await);
        }
        self.get_spec(project, id).await
    }

    pub async fn delete_spec(&self, project: &str, id: &str) -> Result<()> {
        self.delete_row("specs", project, id).await
    }
}

// -- Epics ---------------------------------------------------------------------

impl Store {
    pub async fn create_epic(&self, epic: &Epic) -> Result<Epic> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO epics (project, id, spec_id, title, description, status, version,
                                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&epic.project)
        .bind(&epic.id)
        .bind(&epic.spec_id)
        .bind(&epic.title)
        .bind(&epic.description)
        .bind(&epic.status)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_epic(&epic.project, &epic.id).await
    }

    pub async fn get_epic(&self, project: &str, id: &str) -> Result<Epic> {
        let row = sqlx::query("SELECT * FROM epics WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| epic_from_row(&r)).ok_or_else(|| Error::NotFound(format!("epic {id}")))
    }

    pub async fn list_epics(&self, project: &str) -> Result<Vec<Epic>> {
        let rows = sqlx::query("SELECT * FROM epics WHERE project = ? ORDER BY created_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(epic_from_row).collect())
    }

    pub async fn update_epic(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Epic> {
        let updated = sqlx::query(
            "UPDATE epics SET
                 spec_id = COALESCE(?, spec_id),
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 status = COALESCE(?, status),
                 version = version + 1,
                 updated_at = ?
             WHERE project = ? AND id = ? AND version = ?",
        )
        .bind(&patch.parent_id)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.status)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .bind(patch.version as i64)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.versioned_miss("epics", project, id).await);
        }
        self.get_epic(project, id).await
    }

    pub async fn delete_epic(&self, project: &str, id: &str) -> Result<()> {
        self.delete_row("epics", project, id).await
    }
}

// -- Stories -------------------------------------------------------------------

impl Store {
    pub async fn create_story(&self, story: &Story) -> Result<Story> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO stories (project, id, epic_id, title, description, status, version,
                                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&story.project)
        .bind(&story.id)
        .bind(&story.epic_id)
        .bind(&story.title)
        .bind(&story.description)
        .bind(&story.status)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_story(&story.project, &story.id).await
    }

    pub async fn get_story(&self, project: &str, id: &str) -> Result<Story> {
        let row = sqlx::query("SELECT * FROM stories WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| story_from_row(&r)).ok_or_else(|| Error::NotFound(format!("story {id}")))
    }

    pub async fn list_stories(&self, project: &str) -> Result<Vec<Story>> {
        let rows = sqlx::query("SELECT * FROM stories WHERE project = ? ORDER BY created_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(story_from_row).collect())
    }

    pub async fn update_story(
        &self,
        project: &str,
        id: &str,
        patch: &EntityPatch,
    ) -> Result<Story> {
        let updated = sqlx::query(
            "UPDATE stories SET
                 epic_id = COALESCE(?, epic_id),
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 status = COALESCE(?, status),
                 version = version + 1,
                 updated_at = ?
             WHERE project = ? AND id = ? AND version = ?",
        )
        .bind(&patch.parent_id)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.status)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .bind(patch.version as i64)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.versioned_miss("stories", project, id).await);
        }
        self.get_story(project, id).await
    }

    pub async fn delete_story(&self, project: &str, id: &str) -> Result<()> {
        self.delete_row("stories", project, id).await
    }
}

// -- Tasks ---------------------------------------------------------------------

impl Store {
    pub async fn create_task(&self, task: &Task) -> Result<Task> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tasks (project, id, story_id, title, description, status, assignee,
                                version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&task.project)
        .bind(&task.id)
        .bind(&task.story_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.status)
        .bind(&task.assignee)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_task(&task.project, &task.id).await
    }

    pub async fn get_task(&self, project: &str, id: &str) -> Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| task_from_row(&r)).ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    pub async fn list_tasks(&self, project: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE project = ? ORDER BY created_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    pub async fn update_task(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Task> {
        let updated = sqlx::query(
            "UPDATE tasks SET
                 story_id = COALESCE(?, story_id),
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 status = COALESCE(?, status),
                 assignee = COALESCE(?, assignee),
                 version = version + 1,
                 updated_at = ?
             WHERE project = ? AND id = ? AND version = ?",
        )
        .bind(&patch.parent_id)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.status)
        .bind(&patch.assignee)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .bind(patch.version as i64)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.versioned_miss("tasks", project, id).await);
        }
        self.get_task(project, id).await
    }

    pub async fn delete_task(&self, project: &str, id: &str) -> Result<()> {
        self.delete_row("tasks", project, id).await
    }
}

// -- Insights ------------------------------------------------------------------

impl Store {
    pub async fn create_insight(&self, insight: &Insight) -> Result<Insight> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO insights (project, id, spec_id, title, body, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&insight.project)
        .bind(&insight.id)
        .bind(&insight.spec_id)
        .bind(&insight.title)
        .bind(&insight.body)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_insight(&insight.project, &insight.id).await
    }

    pub async fn get_insight(&self, project: &str, id: &str) -> Result<Insight> {
        let row = sqlx::query("SELECT * FROM insights WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| insight_from_row(&r)).ok_or_else(|| Error::NotFound(format!("insight {id}")))
    }

    pub async fn list_insights(&self, project: &str) -> Result<Vec<Insight>> {
        let rows = sqlx::query("SELECT * FROM insights WHERE project = ? ORDER BY created_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(insight_from_row).collect())
    }

    /// Insights are unversioned; the update is unconditional.
    pub async fn update_insight(
        &self,
        project: &str,
        id: &str,
        patch: &InsightPatch,
    ) -> Result<Insight> {
        let updated = sqlx::query(
            "UPDATE insights SET
                 title = COALESCE(?, title),
                 body = COALESCE(?, body),
                 spec_id = COALESCE(?, spec_id),
                 updated_at = ?
             WHERE project = ? AND id = ?",
        )
        .bind(&patch.title)
        .bind(&patch.body)
        .bind(&patch.spec_id)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("insight {id}")));
        }
        self.get_insight(project, id).await
    }

    pub async fn delete_insight(&self, project: &str, id: &str) -> Result<()> {
        self.delete_row("insights", project, id).await
    }
}

// -- Sessions ------------------------------------------------------------------

impl Store {
    pub async fn create_session(&self, session: &WorkSession) -> Result<WorkSession> {
        sqlx::query(
            "INSERT INTO sessions (project, id, agent_id, name, status, started_at, stopped_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(&session.project)
        .bind(&session.id)
        .bind(&session.agent_id)
        .bind(&session.name)
        .bind(&session.status)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        self.get_session(&session.project, &session.id).await
    }

    pub async fn get_session(&self, project: &str, id: &str) -> Result<WorkSession> {
        let row = sqlx::query("SELECT * FROM sessions WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| session_from_row(&r)).ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    pub async fn list_sessions(&self, project: &str) -> Result<Vec<WorkSession>> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE project = ? ORDER BY started_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    /// Sessions are unversioned. Transitioning status to `stopped` stamps
    /// `stopped_at` once; later updates never clear it.
    pub async fn update_session(
        &self,
        project: &str,
        id: &str,
        patch: &SessionPatch,
    ) -> Result<WorkSession> {
        let stopping = patch.status.as_deref() == Some("stopped");
        let updated = sqlx::query(
            "UPDATE sessions SET
                 name = COALESCE(?, name),
                 status = COALESCE(?, status),
                 stopped_at = CASE WHEN ? THEN COALESCE(stopped_at, ?) ELSE stopped_at END
             WHERE project = ? AND id = ?",
        )
        .bind(&patch.name)
        .bind(&patch.status)
        .bind(stopping)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session {id}")));
        }
        self.get_session(project, id).await
    }

    pub async fn delete_session(&self, project: &str, id: &str) -> Result<()> {
        self.delete_row("sessions", project, id).await
    }
}

// -- CUJs ----------------------------------------------------------------------

impl Store {
    pub async fn create_cuj(&self, cuj: &Cuj) -> Result<Cuj> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO cujs (project, id, spec_id, title, description, status, version,
                               created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&cuj.project)
        .bind(&cuj.id)
        .bind(&cuj.spec_id)
        .bind(&cuj.title)
        .bind(&cuj.description)
        .bind(&cuj.status)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.get_cuj(&cuj.project, &cuj.id).await
    }

    pub async fn get_cuj(&self, project: &str, id: &str) -> Result<Cuj> {
        let row = sqlx::query("SELECT * FROM cujs WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| cuj_from_row(&r)).ok_or_else(|| Error::NotFound(format!("cuj {id}")))
    }

    pub async fn list_cujs(&self, project: &str) -> Result<Vec<Cuj>> {
        let rows = sqlx::query("SELECT * FROM cujs WHERE project = ? ORDER BY created_at ASC")
            .bind(project)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(cuj_from_row).collect())
    }

    pub async fn update_cuj(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Cuj> {
        let updated = sqlx::query(
            "UPDATE cujs SET
                 spec_id = COALESCE(?, spec_id),
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 status = COALESCE(?, status),
                 version = version + 1,
                 updated_at = ?
             WHERE project = ? AND id = ? AND version = ?",
        )
        .bind(&patch.parent_id)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.status)
        .bind(Utc::now())
        .bind(project)
        .bind(id)
        .bind(patch.version as i64)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.versioned_miss("cujs", project, id).await);
        }
        self.get_cuj(project, id).await
    }

    /// Deleting a CUJ cascades its feature links.
    pub async fn delete_cuj(&self, project: &str, id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let deleted = sqlx::query("DELETE FROM cujs WHERE project = ? AND id = ?")
            .bind(project)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("cuj {id}")));
        }
        sqlx::query("DELETE FROM cuj_feature_links WHERE project = ? AND cuj_id = ?")
            .bind(project)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn link_cuj_feature(
        &self,
        project: &str,
        cuj_id: &str,
        feature_id: &str,
    ) -> Result<()> {
        // Make sure the CUJ exists so links cannot dangle at creation time.
        self.get_cuj(project, cuj_id).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO cuj_feature_links (project, cuj_id, feature_id, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(project)
        .bind(cuj_id)
        .bind(feature_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn unlink_cuj_feature(
        &self,
        project: &str,
        cuj_id: &str,
        feature_id: &str,
    ) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM cuj_feature_links WHERE project = ? AND cuj_id = ? AND feature_id = ?",
        )
        .bind(project)
        .bind(cuj_id)
        .bind(feature_id)
        .execute(self.pool())
        .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("link {cuj_id} -> {feature_id}")));
        }
        Ok(())
    }

    pub async fn cuj_feature_links(&self, project: &str, cuj_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT feature_id FROM cuj_feature_links
             WHERE project = ? AND cuj_id = ? ORDER BY created_at ASC",
        )
        .bind(project)
        .bind(cuj_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(|r| r.get("feature_id")).collect())
    }
}

#[cfg(test)]
#[path = "domain_tests.rs"]
mod tests;
