// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resilient facade over the store: every call runs as
//! `breaker.execute(|| with_retry(|| inner))`.
//!
//! The retry absorbs benign single-writer contention; the breaker stops the
//! process from piling work onto a wedged database. Ordering matters: the
//! breaker sits outside, so `CircuitOpen` is never produced inside the retry
//! loop and therefore never classified as lock-like.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::breaker::{with_retry, CircuitBreaker, RetryPolicy};
use crate::error::{ConflictInfo, Error, Result};
use crate::model::{
    Agent, Cuj, Epic, Event, Insight, Message, RecipientStatus, Reservation, Spec, Story, Task,
    ThreadSummary, WorkSession,
};
use crate::store::domain::{EntityPatch, InsightPatch, SessionPatch};
use crate::store::events::NewEvent;
use crate::store::reservations::NewReservation;
use crate::store::Store;

/// Store wrapper composing the circuit breaker over the lock retry.
#[derive(Clone)]
pub struct ResilientStore {
    inner: Store,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientStore {
    pub fn new(inner: Store, retry: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, retry, breaker }
    }

    pub fn with_defaults(inner: Store) -> Self {
        Self::new(inner, RetryPolicy::default(), Arc::new(CircuitBreaker::default()))
    }

    /// The unwrapped store. Used at shutdown and by tests.
    pub fn inner(&self) -> &Store {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        // Semantic errors (not-found, conflicts, ownership) are successful
        // round trips of the store; only storage-class failures feed the
        // breaker's failure accounting.
        let result = self
            .breaker
            .execute(|| async {
                match with_retry(&self.retry, &f).await {
                    Ok(v) => Ok(Ok(v)),
                    Err(e @ (Error::Storage(_) | Error::Internal(_))) => Err(e),
                    Err(e) => Ok(Err(e)),
                }
            })
            .await;
        match result {
            Ok(inner) => inner,
            Err(e) => Err(e),
        }
    }

    // -- Event log -------------------------------------------------------------

    pub async fn append_event(&self, new: NewEvent) -> Result<Event> {
        self.run(|| self.inner.append_event(new.clone())).await
    }

    pub async fn inbox_since(
        &self,
        project: &str,
        agent: &str,
        cursor: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        self.run(|| self.inner.inbox_since(project, agent, cursor, limit)).await
    }

    pub async fn inbox_counts(&self, project: &str, agent: &str) -> Result<(u64, u64)> {
        self.run(|| self.inner.inbox_counts(project, agent)).await
    }

    pub async fn thread_messages(
        &self,
        project: &str,
        thread_id: &str,
        cursor: u64,
    ) -> Result<Vec<Message>> {
        self.run(|| self.inner.thread_messages(project, thread_id, cursor)).await
    }

    pub async fn list_threads(
        &self,
        project: &str,
        agent: &str,
        cursor: u64,
        limit: Option<u32>,
    ) -> Result<Vec<ThreadSummary>> {
        self.run(|| self.inner.list_threads(project, agent, cursor, limit)).await
    }

    pub async fn mark_read(&self, project: &str, message_id: &str, agent_id: &str) -> Result<()> {
        self.run(|| self.inner.mark_read(project, message_id, agent_id)).await
    }

    pub async fn mark_ack(&self, project: &str, message_id: &str, agent_id: &str) -> Result<()> {
        self.run(|| self.inner.mark_ack(project, message_id, agent_id)).await
    }

    pub async fn recipient_statuses(
        &self,
        project: &str,
        message_id: &str,
    ) -> Result<Vec<RecipientStatus>> {
        self.run(|| self.inner.recipient_statuses(project, message_id)).await
    }

    pub async fn get_message(&self, project: &str, message_id: &str) -> Result<Message> {
        self.run(|| self.inner.get_message(project, message_id)).await
    }

    pub async fn events_since(
        &self,
        project: &str,
        cursor: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Event>> {
        self.run(|| self.inner.events_since(project, cursor, limit)).await
    }

    pub async fn latest_cursor(&self) -> Result<u64> {
        self.run(|| self.inner.latest_cursor()).await
    }

    // -- Agents ----------------------------------------------------------------

    pub async fn register_agent(&self, agent: &Agent) -> Result<Agent> {
        self.run(|| self.inner.register_agent(agent)).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent> {
        self.run(|| self.inner.get_agent(id)).await
    }

    pub async fn list_agents(
        &self,
        project: Option<&str>,
        capability: Option<&str>,
    ) -> Result<Vec<Agent>> {
        self.run(|| self.inner.list_agents(project, capability)).await
    }

    pub async fn heartbeat(&self, project: &str, agent_id: &str) -> Result<()> {
        self.run(|| self.inner.heartbeat(project, agent_id)).await
    }

    pub async fn update_agent_metadata(
        &self,
        project: &str,
        agent_id: &str,
        patch: &HashMap<String, String>,
    ) -> Result<Agent> {
        self.run(|| self.inner.update_agent_metadata(project, agent_id, patch)).await
    }

    // -- Reservations ----------------------------------------------------------

    pub async fn reserve(&self, new: NewReservation) -> Result<Reservation> {
        self.run(|| self.inner.reserve(new.clone())).await
    }

    pub async fn check_conflicts(
        &self,
        project: &str,
        pattern: &str,
        exclusive: bool,
    ) -> Result<Vec<ConflictInfo>> {
        self.run(|| self.inner.check_conflicts(project, pattern, exclusive)).await
    }

    pub async fn release_reservation(&self, id: &str, agent_id: &str) -> Result<Reservation> {
        self.run(|| self.inner.release_reservation(id, agent_id)).await
    }

    pub async fn get_reservation(&self, id: &str) -> Result<Reservation> {
        self.run(|| self.inner.get_reservation(id)).await
    }

    pub async fn active_reservations(&self, project: &str) -> Result<Vec<Reservation>> {
        self.run(|| self.inner.active_reservations(project)).await
    }

    pub async fn agent_reservations(&self, agent_id: &str) -> Result<Vec<Reservation>> {
        self.run(|| self.inner.agent_reservations(agent_id)).await
    }

    pub async fn sweep_expired(
        &self,
        expired_before: DateTime<Utc>,
        heartbeat_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reservation>> {
        self.run(|| self.inner.sweep_expired(expired_before, heartbeat_after)).await
    }

    // -- Specs -----------------------------------------------------------------

    pub async fn create_spec(&self, spec: &Spec) -> Result<Spec> {
        self.run(|| self.inner.create_spec(spec)).await
    }

    pub async fn get_spec(&self, project: &str, id: &str) -> Result<Spec> {
        self.run(|| self.inner.get_spec(project, id)).await
    }

    pub async fn list_specs(&self, project: &str) -> Result<Vec<Spec>> {
        self.run(|| self.inner.list_specs(project)).await
    }

    pub async fn update_spec(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Spec> {
        self.run(|| self.inner.update_spec(project, id, patch)).await
    }

    pub async fn delete_spec(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_spec(project, id)).await
    }

    // -- Epics -----------------------------------------------------------------

    pub async fn create_epic(&self, epic: &Epic) -> Result<Epic> {
        self.run(|| self.inner.create_epic(epic)).await
    }

    pub async fn get_epic(&self, project: &str, id: &str) -> Result<Epic> {
        self.run(|| self.inner.get_epic(project, id)).await
    }

    pub async fn list_epics(&self, project: &str) -> Result<Vec<Epic>> {
        self.run(|| self.inner.list_epics(project)).await
    }

    pub async fn update_epic(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Epic> {
        self.run(|| self.inner.update_epic(project, id, patch)).await
    }

    pub async fn delete_epic(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_epic(project, id)).await
    }

    // -- Stories ---------------------------------------------------------------

    pub async fn create_story(&self, story: &Story) -> Result<Story> {
        self.run(|| self.inner.create_story(story)).await
    }

    pub async fn get_story(&self, project: &str, id: &str) -> Result<Story> {
        self.run(|| self.inner.get_story(project, id)).await
    }

    pub async fn list_stories(&self, project: &str) -> Result<Vec<Story>> {
        self.run(|| self.inner.list_stories(project)).await
    }

    pub async fn update_story(
        &self,
        project: &str,
        id: &str,
        patch: &EntityPatch,
    ) -> Result<Story> {
        self.run(|| self.inner.update_story(project, id, patch)).await
    }

    pub async fn delete_story(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_story(project, id)).await
    }

    // -- Tasks -----------------------------------------------------------------

    pub async fn create_task(&self, task: &Task) -> Result<Task> {
        self.run(|| self.inner.create_task(task)).await
    }

    pub async fn get_task(&self, project: &str, id: &str) -> Result<Task> {
        self.run(|| self.inner.get_task(project, id)).await
    }

    pub async fn list_tasks(&self, project: &str) -> Result<Vec<Task>> {
        self.run(|| self.inner.list_tasks(project)).await
    }

    pub async fn update_task(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Task> {
        self.run(|| self.inner.update_task(project, id, patch)).await
    }

    pub async fn delete_task(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_task(project, id)).await
    }

    // -- Insights --------------------------------------------------------------

    pub async fn create_insight(&self, insight: &Insight) -> Result<Insight> {
        self.run(|| self.inner.create_insight(insight)).await
    }

    pub async fn get_insight(&self, project: &str, id: &str) -> Result<Insight> {
        self.run(|| self.inner.get_insight(project, id)).await
    }

    pub async fn list_insights(&self, project: &str) -> Result<Vec<Insight>> {
        self.run(|| self.inner.list_insights(project)).await
    }

    pub async fn update_insight(
        &self,
        project: &str,
        id: &str,
        patch: &InsightPatch,
    ) -> Result<Insight> {
        self.run(|| self.inner.update_insight(project, id, patch)).await
    }

    pub async fn delete_insight(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_insight(project, id)).await
    }

    // -- Sessions --------------------------------------------------------------

    pub async fn create_session(&self, session: &WorkSession) -> Result<WorkSession> {
        self.run(|| self.inner.create_session(session)).await
    }

    pub async fn get_session(&self, project: &str, id: &str) -> Result<WorkSession> {
        self.run(|| self.inner.get_session(project, id)).await
    }

    pub async fn list_sessions(&self, project: &str) -> Result<Vec<WorkSession>> {
        self.run(|| self.inner.list_sessions(project)).await
    }

    pub async fn update_session(
        &self,
        project: &str,
        id: &str,
        patch: &SessionPatch,
    ) -> Result<WorkSession> {
        self.run(|| self.inner.update_session(project, id, patch)).await
    }

    pub async fn delete_session(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_session(project, id)).await
    }

    // -- CUJs ------------------------------------------------------------------

    pub async fn create_cuj(&self, cuj: &Cuj) -> Result<Cuj> {
        self.run(|| self.inner.create_cuj(cuj)).await
    }

    pub async fn get_cuj(&self, project: &str, id: &str) -> Result<Cuj> {
        self.run(|| self.inner.get_cuj(project, id)).await
    }

    pub async fn list_cujs(&self, project: &str) -> Result<Vec<Cuj>> {
        self.run(|| self.inner.list_cujs(project)).await
    }

    pub async fn update_cuj(&self, project: &str, id: &str, patch: &EntityPatch) -> Result<Cuj> {
        self.run(|| self.inner.update_cuj(project, id, patch)).await
    }

    pub async fn delete_cuj(&self, project: &str, id: &str) -> Result<()> {
        self.run(|| self.inner.delete_cuj(project, id)).await
    }

    pub async fn link_cuj_feature(
        &self,
        project: &str,
        cuj_id: &str,
        feature_id: &str,
    ) -> Result<()> {
        self.run(|| self.inner.link_cuj_feature(project, cuj_id, feature_id)).await
    }

    pub async fn unlink_cuj_feature(
        &self,
        project: &str,
        cuj_id: &str,
        feature_id: &str,
    ) -> Result<()> {
        self.run(|| self.inner.unlink_cuj_feature(project, cuj_id, feature_id)).await
    }

    pub async fn cuj_feature_links(&self, project: &str, cuj_id: &str) -> Result<Vec<String>> {
        self.run(|| self.inner.cuj_feature_links(project, cuj_id)).await
    }
}

#[cfg(test)]
#[path = "resilient_tests.rs"]
mod tests;
