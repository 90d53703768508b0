// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message, inbox, thread, and event-feed handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Event, EventKind, Message, ThreadSummary};
use crate::state::AppState;
use crate::store::events::NewEvent;
use crate::transport::auth::AuthInfo;

// -- Request/Response types ----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub ack_required: bool,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub cursor: u64,
}

#[derive(Debug, Deserialize)]
pub struct MessageActionRequest {
    pub agent: String,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageActionResponse {
    pub message_id: String,
    pub action: String,
    pub agent: String,
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub since_cursor: u64,
    pub limit: Option<u32>,
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub messages: Vec<Message>,
    /// Greatest returned cursor; pass back as `since_cursor` to continue.
    pub cursor: u64,
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InboxCountsResponse {
    pub total: u64,
    pub unread: u64,
}

#[derive(Debug, Deserialize)]
pub struct ThreadsQuery {
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub cursor: u64,
    pub limit: Option<u32>,
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ThreadsResponse {
    pub threads: Vec<ThreadSummary>,
    /// Smallest returned `last_cursor`. Threads page *backward*: pass this
    /// value back to fetch older threads, unlike the inbox's forward cursor.
    pub cursor: u64,
}

#[derive(Debug, Deserialize)]
pub struct ThreadMessagesQuery {
    #[serde(default)]
    pub cursor: u64,
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ThreadMessagesResponse {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub cursor: u64,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since_cursor: u64,
    pub limit: Option<u32>,
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
    pub cursor: u64,
}

// -- Handlers ------------------------------------------------------------------

/// `POST /api/messages` — persist and fan out a message.
pub async fn send_message(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>> {
    if req.from.is_empty() {
        return Err(Error::InvalidInput("message requires a sender".to_owned()));
    }
    if req.to.is_empty() {
        return Err(Error::InvalidInput("message requires at least one recipient".to_owned()));
    }
    let project = auth.resolve_project(req.project.as_deref())?;

    let message = Message {
        id: req.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        thread_id: req.thread_id,
        project: project.clone(),
        from: req.from.clone(),
        to: req.to,
        cc: req.cc,
        bcc: req.bcc,
        subject: req.subject,
        body: req.body,
        importance: req.importance,
        ack_required: req.ack_required,
        created_at: Utc::now(),
        cursor: 0,
    };

    let event = s
        .store
        .append_event(NewEvent {
            kind: EventKind::MessageCreated,
            project: project.clone(),
            agent: Some(req.from),
            payload: serde_json::json!({ "message_id": message.id }),
            message: Some(message),
        })
        .await?;
    let Some(stored) = event.message else {
        return Err(Error::Internal("message.created event lost its message".to_owned()));
    };

    // One targeted push frame per recipient; persistence is already durable,
    // so a slow or absent subscriber costs nothing.
    for (recipient, _) in stored.recipients() {
        let frame = serde_json::json!({
            "type": EventKind::MessageCreated.as_str(),
            "project": project,
            "agent": recipient,
            "message_id": stored.id,
            "cursor": stored.cursor,
            "from": stored.from,
            "thread_id": stored.thread_id,
            "subject": stored.subject,
        });
        s.hub.broadcast(&project, recipient, &frame).await;
    }

    Ok(Json(SendMessageResponse { message_id: stored.id, cursor: stored.cursor }))
}

/// `POST /api/messages/{id}/{action}` — `read` or `ack` status transition.
pub async fn message_action(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path((message_id, action)): Path<(String, String)>,
    Json(req): Json<MessageActionRequest>,
) -> Result<Json<MessageActionResponse>> {
    let kind = match action.as_str() {
        "read" => EventKind::MessageRead,
        "ack" => EventKind::MessageAck,
        other => return Err(Error::NotFound(format!("unknown message action {other:?}"))),
    };
    if req.agent.is_empty() {
        return Err(Error::InvalidInput("action requires an agent".to_owned()));
    }
    let project = auth.resolve_project(req.project.as_deref())?;

    match kind {
        EventKind::MessageRead => s.store.mark_read(&project, &message_id, &req.agent).await?,
        _ => s.store.mark_ack(&project, &message_id, &req.agent).await?,
    }

    s.store
        .append_event(
            NewEvent::bare(kind, project.clone())
                .with_agent(req.agent.clone())
                .with_payload(serde_json::json!({ "message_id": message_id })),
        )
        .await?;

    // Tell the sender its message was read/acked.
    if let Ok(message) = s.store.get_message(&project, &message_id).await {
        let frame = serde_json::json!({
            "type": kind.as_str(),
            "project": project,
            "agent": message.from,
            "message_id": message_id,
            "by": req.agent,
        });
        s.hub.broadcast(&project, &message.from, &frame).await;
    }

    Ok(Json(MessageActionResponse { message_id, action, agent: req.agent }))
}

/// `GET /api/inbox/{agent}` — incremental inbox fetch.
pub async fn inbox(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(agent): Path<String>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<InboxResponse>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let messages = s.store.inbox_since(&project, &agent, query.since_cursor, query.limit).await?;
    let cursor = messages.last().map_or(query.since_cursor, |m| m.cursor);
    Ok(Json(InboxResponse { messages, cursor }))
}

/// `GET /api/inbox/{agent}/counts`
pub async fn inbox_counts(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(agent): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<InboxCountsResponse>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let (total, unread) = s.store.inbox_counts(&project, &agent).await?;
    Ok(Json(InboxCountsResponse { total, unread }))
}

/// `GET /api/threads` — per-agent thread summaries, newest first.
pub async fn list_threads(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ThreadsQuery>,
) -> Result<Json<ThreadsResponse>> {
    if query.agent.is_empty() {
        return Err(Error::InvalidInput("threads listing requires an agent".to_owned()));
    }
    let project = auth.resolve_project(query.project.as_deref())?;
    let threads = s.store.list_threads(&project, &query.agent, query.cursor, query.limit).await?;
    let cursor = threads.last().map_or(query.cursor, |t| t.last_cursor);
    Ok(Json(ThreadsResponse { threads, cursor }))
}

/// `GET /api/threads/{id}` — messages in one thread.
pub async fn thread_messages(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(thread_id): Path<String>,
    Query(query): Query<ThreadMessagesQuery>,
) -> Result<Json<ThreadMessagesResponse>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let messages = s.store.thread_messages(&project, &thread_id, query.cursor).await?;
    let cursor = messages.iter().map(|m| m.cursor).max().unwrap_or(query.cursor);
    Ok(Json(ThreadMessagesResponse { thread_id, messages, cursor }))
}

/// `GET /api/events` — raw event feed for resync.
pub async fn events(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let events = s.store.events_since(&project, query.since_cursor, query.limit).await?;
    let cursor = events.last().map_or(query.since_cursor, |e| e.cursor);
    Ok(Json(EventsResponse { events, cursor }))
}
