// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registration, discovery, heartbeat, and metadata handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Agent, EventKind};
use crate::state::AppState;
use crate::transport::auth::AuthInfo;

// -- Request/Response types ----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub agent_id: String,
    pub session_id: String,
    pub name: String,
    /// Current tail of the event log; start inbox polling from here.
    pub cursor: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    pub project: Option<String>,
    pub capability: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<Agent>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataPatchRequest {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// -- Handlers ------------------------------------------------------------------

/// `POST /api/agents` — register a worker.
pub async fn register(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    if req.name.is_empty() {
        return Err(Error::InvalidInput("agent requires a name".to_owned()));
    }
    let project = auth.resolve_project(req.project.as_deref())?;

    let agent = Agent {
        id: req.agent_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        session_id: req.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: req.name,
        project,
        capabilities: req.capabilities,
        metadata: req.metadata,
        status: "online".to_owned(),
        created_at: Utc::now(),
        last_seen: Utc::now(),
    };
    let stored = s.store.register_agent(&agent).await?;
    let cursor = s.store.latest_cursor().await?;

    Ok(Json(RegisterResponse {
        agent_id: stored.id,
        session_id: stored.session_id,
        name: stored.name,
        cursor,
    }))
}

/// `GET /api/agents` — list/discover agents.
pub async fn list(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ListAgentsQuery>,
) -> Result<Json<ListAgentsResponse>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let filter = if project.is_empty() { None } else { Some(project.as_str()) };
    let agents = s.store.list_agents(filter, query.capability.as_deref()).await?;
    Ok(Json(ListAgentsResponse { agents }))
}

/// `POST /api/agents/{id}/heartbeat` — advance `last_seen`.
///
/// In bearer mode the touch is scoped to the authorised project; an agent in
/// another project is indistinguishable from a missing one (404).
pub async fn heartbeat(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(agent_id): Path<String>,
    body: Option<Json<HeartbeatRequest>>,
) -> Result<Json<serde_json::Value>> {
    let requested = body.as_ref().and_then(|b| b.project.clone());
    let scope = match auth.mode {
        crate::transport::auth::AuthMode::Bearer => {
            auth.resolve_project(requested.as_deref().or(auth.project.as_deref()))?
        }
        crate::transport::auth::AuthMode::Loopback => requested.unwrap_or_default(),
    };
    s.store.heartbeat(&scope, &agent_id).await?;

    if let Ok(agent) = s.store.get_agent(&agent_id).await {
        let frame = serde_json::json!({
            "type": EventKind::AgentHeartbeat.as_str(),
            "project": agent.project,
            "agent": agent_id,
        });
        s.hub.broadcast(&agent.project, "", &frame).await;
    }

    Ok(Json(serde_json::json!({ "agent_id": agent_id, "ok": true })))
}

/// `PATCH /api/agents/{id}/metadata` — merge metadata keys.
pub async fn patch_metadata(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(agent_id): Path<String>,
    Json(req): Json<MetadataPatchRequest>,
) -> Result<Json<Agent>> {
    let scope = match auth.mode {
        crate::transport::auth::AuthMode::Bearer => {
            auth.resolve_project(req.project.as_deref().or(auth.project.as_deref()))?
        }
        crate::transport::auth::AuthMode::Loopback => req.project.clone().unwrap_or_default(),
    };
    let updated = s.store.update_agent_metadata(&scope, &agent_id, &req.metadata).await?;
    Ok(Json(updated))
}
