// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background reservation sweeper.
//!
//! On start it runs one guarded sweep that only reclaims reservations whose
//! expiry predates process start by five minutes, so an orderly restart does
//! not kill claims that were healthy moments ago. After that, every interval
//! it reclaims anything expired or held by an agent silent past the grace
//! window, appending `reservation.expired` to the log and pushing the same
//! frame project-wide. Errors are logged and the loop continues; the sweeper
//! never takes the process down.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::model::EventKind;
use crate::state::AppState;
use crate::store::events::NewEvent;

/// Grace applied to the first sweep after process start, in seconds.
const STARTUP_GUARD_SECS: i64 = 300;

/// Spawn the sweeper task. The returned handle completes after the shutdown
/// token fires; the supervisor awaits it before closing the store.
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let started_at = Utc::now();

        // Guarded initial sweep: expiry cutoff well before process start,
        // no heartbeat clause.
        sweep_once(&state, started_at - Duration::seconds(STARTUP_GUARD_SECS), None).await;

        let mut interval = tokio::time::interval(state.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // first tick fires immediately; already swept

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Utc::now();
            sweep_once(&state, now, Some(now - state.config.sweep_grace())).await;
        }
        tracing::debug!("sweeper stopped");
    })
}

/// One sweep pass. Returns the number of reservations reclaimed.
pub(crate) async fn sweep_once(
    state: &AppState,
    expired_before: DateTime<Utc>,
    heartbeat_after: Option<DateTime<Utc>>,
) -> usize {
    let swept = match state.store.sweep_expired(expired_before, heartbeat_after).await {
        Ok(swept) => swept,
        Err(e) => {
            tracing::warn!(err = %e, "reservation sweep failed");
            return 0;
        }
    };

    for r in &swept {
        tracing::info!(
            reservation = %r.id,
            agent = %r.agent_id,
            project = %r.project,
            pattern = %r.path_pattern,
            "reclaimed expired reservation"
        );
        let payload = serde_json::json!({
            "reservation_id": r.id,
            "agent_id": r.agent_id,
            "path_pattern": r.path_pattern,
        });
        if let Err(e) = state
            .store
            .append_event(
                NewEvent::bare(EventKind::ReservationExpired, r.project.clone())
                    .with_agent(r.agent_id.clone())
                    .with_payload(payload.clone()),
            )
            .await
        {
            tracing::warn!(err = %e, "failed to record reservation.expired event");
        }

        let mut frame = payload;
        frame["type"] = serde_json::json!(EventKind::ReservationExpired.as_str());
        frame["project"] = serde_json::json!(r.project);
        state.hub.broadcast(&r.project, "", &frame).await;
    }
    swept.len()
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
