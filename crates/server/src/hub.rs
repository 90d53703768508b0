// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push hub — fans newly appended events out to live subscribers keyed by
//! `(project, agent)`.
//!
//! Delivery is best-effort. Frames pass through a small bounded channel to
//! the subscriber's socket task, and the per-frame write deadline bounds
//! both stages: the enqueue here and the socket write in the WS handler
//! (which reads it via [`Hub::write_deadline`]). A subscriber that cannot
//! keep up on either stage is dropped rather than backpressuring the
//! producer; disconnected agents recover via the durable inbox and their
//! cursor. The registry mutex is held only to snapshot targets; sends
//! happen outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

/// Frames a subscriber can queue before the write deadline starts counting.
const SUBSCRIBER_BUFFER: usize = 64;

/// One registered push subscriber.
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<String>,
}

/// Handle returned by [`Hub::subscribe`]. Dropping the receiver (or calling
/// [`Hub::unsubscribe`]) detaches the subscriber.
pub struct Subscription {
    pub id: u64,
    pub project: String,
    pub agent: String,
    pub rx: mpsc::Receiver<String>,
}

/// Registry of live push subscribers.
pub struct Hub {
    subscribers: Mutex<HashMap<(String, String), Vec<Subscriber>>>,
    next_id: AtomicU64,
    write_deadline: Duration,
}

impl Hub {
    pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(5);

    pub fn new(write_deadline: Duration) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_deadline,
        }
    }

    /// Per-frame deadline subscribers must also apply to their own socket
    /// writes.
    pub fn write_deadline(&self) -> Duration {
        self.write_deadline
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Vec<Subscriber>>> {
        match self.subscribers.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a subscriber for `(project, agent)`.
    pub fn subscribe(&self, project: &str, agent: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock()
            .entry((project.to_owned(), agent.to_owned()))
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!(project, agent, id, "push subscriber attached");
        Subscription { id, project: project.to_owned(), agent: agent.to_owned(), rx }
    }

    /// Remove one subscriber by id.
    pub fn unsubscribe(&self, project: &str, agent: &str, id: u64) {
        let mut subs = self.lock();
        let key = (project.to_owned(), agent.to_owned());
        if let Some(list) = subs.get_mut(&key) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subs.remove(&key);
            }
        }
    }

    /// Live subscriber count for a project (all agents).
    pub fn subscriber_count(&self, project: &str) -> usize {
        self.lock()
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, list)| list.len())
            .sum()
    }

    /// Deliver a frame. A non-empty `agent` targets exactly that
    /// `(project, agent)` pair; an empty `agent` reaches every subscriber in
    /// the project. Write failures remove only the failing subscriber.
    pub async fn broadcast(&self, project: &str, agent: &str, frame: &serde_json::Value) {
        let Ok(text) = serde_json::to_string(frame) else {
            return;
        };

        // Snapshot senders under the lock, write outside it.
        let targets: Vec<(String, String, u64, mpsc::Sender<String>)> = {
            let subs = self.lock();
            subs.iter()
                .filter(|((p, a), _)| p == project && (agent.is_empty() || a == agent))
                .flat_map(|((p, a), list)| {
                    list.iter().map(|s| (p.clone(), a.clone(), s.id, s.tx.clone()))
                })
                .collect()
        };

        for (p, a, id, tx) in targets {
            let result = tokio::time::timeout(self.write_deadline, tx.send(text.clone())).await;
            let failed = !matches!(result, Ok(Ok(())));
            if failed {
                tracing::warn!(project = %p, agent = %a, id, "dropping slow push subscriber");
                self.unsubscribe(&p, &a, id);
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WRITE_DEADLINE)
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
