// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical records for the coordination service.
//!
//! Everything here is partitioned by an opaque `project` string. Cursors are
//! the dense monotonic positions assigned by the event log; they are unsigned
//! on the wire and never reused within one store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Event kinds ---------------------------------------------------------------

/// Every event type the log can carry, in wire form (`resource.operation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "message.ack")]
    MessageAck,
    #[serde(rename = "message.read")]
    MessageRead,
    #[serde(rename = "agent.heartbeat")]
    AgentHeartbeat,
    #[serde(rename = "reservation.expired")]
    ReservationExpired,
    #[serde(rename = "spec.created")]
    SpecCreated,
    #[serde(rename = "spec.updated")]
    SpecUpdated,
    #[serde(rename = "spec.archived")]
    SpecArchived,
    #[serde(rename = "epic.created")]
    EpicCreated,
    #[serde(rename = "epic.updated")]
    EpicUpdated,
    #[serde(rename = "epic.archived")]
    EpicArchived,
    #[serde(rename = "story.created")]
    StoryCreated,
    #[serde(rename = "story.updated")]
    StoryUpdated,
    #[serde(rename = "story.archived")]
    StoryArchived,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
    #[serde(rename = "insight.created")]
    InsightCreated,
    #[serde(rename = "insight.linked")]
    InsightLinked,
    #[serde(rename = "session.started")]
    SessionStarted,
    #[serde(rename = "session.stopped")]
    SessionStopped,
    #[serde(rename = "cuj.created")]
    CujCreated,
    #[serde(rename = "cuj.updated")]
    CujUpdated,
    #[serde(rename = "cuj.validated")]
    CujValidated,
    #[serde(rename = "cuj.archived")]
    CujArchived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message.created",
            Self::MessageAck => "message.ack",
            Self::MessageRead => "message.read",
            Self::AgentHeartbeat => "agent.heartbeat",
            Self::ReservationExpired => "reservation.expired",
            Self::SpecCreated => "spec.created",
            Self::SpecUpdated => "spec.updated",
            Self::SpecArchived => "spec.archived",
            Self::EpicCreated => "epic.created",
            Self::EpicUpdated => "epic.updated",
            Self::EpicArchived => "epic.archived",
            Self::StoryCreated => "story.created",
            Self::StoryUpdated => "story.updated",
            Self::StoryArchived => "story.archived",
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskAssigned => "task.assigned",
            Self::TaskCompleted => "task.completed",
            Self::TaskDeleted => "task.deleted",
            Self::InsightCreated => "insight.created",
            Self::InsightLinked => "insight.linked",
            Self::SessionStarted => "session.started",
            Self::SessionStopped => "session.stopped",
            Self::CujCreated => "cuj.created",
            Self::CujUpdated => "cuj.updated",
            Self::CujValidated => "cuj.validated",
            Self::CujArchived => "cuj.archived",
        }
    }

    /// Parse the wire form back into a kind. Unknown strings return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_owned())).ok()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Log records ---------------------------------------------------------------

/// Immutable record appended to the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub cursor: u64,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Present only on `message.created` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    pub created_at: DateTime<Utc>,
    /// Resource-specific fields (entity ids, statuses), flattened onto the
    /// wire object exactly as push frames carry them.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty", flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Payload of a `message.created` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub project: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(default)]
    pub ack_required: bool,
    pub created_at: DateTime<Utc>,
    pub cursor: u64,
}

impl Message {
    /// All recipients, in `to` then `cc` then `bcc` order, deduplicated.
    pub fn recipients(&self) -> Vec<(&str, RecipientKind)> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (list, kind) in [
            (&self.to, RecipientKind::To),
            (&self.cc, RecipientKind::Cc),
            (&self.bcc, RecipientKind::Bcc),
        ] {
            for r in list {
                if seen.insert(r.as_str()) {
                    out.push((r.as_str(), kind));
                }
            }
        }
        out
    }
}

/// Which recipient list an agent appeared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }
}

/// Per-recipient delivery status. Timestamps only move nil → set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientStatus {
    pub project: String,
    pub message_id: String,
    pub agent_id: String,
    pub kind: RecipientKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_at: Option<DateTime<Utc>>,
}

/// Materialised per-participant thread summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub project: String,
    pub thread_id: String,
    pub agent: String,
    pub last_cursor: u64,
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_created_at: Option<DateTime<Utc>>,
}

// -- Agents --------------------------------------------------------------------

/// A registered worker. `id` is unique across projects; `session_id` is
/// unique among agents seen within the stale threshold (5 minutes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Sessions older than this may have their `session_id` reused.
pub const SESSION_STALE_THRESHOLD_SECS: i64 = 300;

// -- Reservations --------------------------------------------------------------

/// A time-bounded claim over workspace paths matching a glob pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub agent_id: String,
    pub project: String,
    pub path_pattern: String,
    pub exclusive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// A reservation is active while unreleased and unexpired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && now < self.expires_at
    }
}

/// Default reservation lifetime.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 30 * 60;

// -- Domain entities -----------------------------------------------------------

/// A product specification. Versioned for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub id: String,
    pub project: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An epic under a spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A story under an epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of work under a story. `status = done` marks completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recorded learning, optionally linked to a spec. Not versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A work session. Not versioned; stopping sets `stopped_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

/// A critical user journey, optionally linked to a spec and to features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cuj {
    pub id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
