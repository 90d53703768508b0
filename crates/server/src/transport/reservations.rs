// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace reservation handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::error::{ConflictInfo, Error, Result};
use crate::model::Reservation;
use crate::state::AppState;
use crate::store::reservations::NewReservation;
use crate::transport::auth::AuthInfo;

// -- Request/Response types ----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub path_pattern: String,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

fn default_exclusive() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListReservationsQuery {
    pub project: Option<String>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListReservationsResponse {
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub id: String,
    pub released: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub project: Option<String>,
    #[serde(default)]
    pub path_pattern: String,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub conflicts: Vec<ConflictInfo>,
}

// -- Handlers ------------------------------------------------------------------

/// `POST /api/reservations` — claim paths. 201 on success, 409 with the
/// conflicting holders otherwise.
pub async fn reserve(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<Reservation>)> {
    if req.agent_id.is_empty() {
        return Err(Error::InvalidInput("reservation requires an agent_id".to_owned()));
    }
    if req.path_pattern.is_empty() {
        return Err(Error::InvalidInput("reservation requires a path_pattern".to_owned()));
    }
    let project = auth.resolve_project(req.project.as_deref())?;

    let reservation = s
        .store
        .reserve(NewReservation {
            agent_id: req.agent_id,
            project,
            path_pattern: req.path_pattern,
            exclusive: req.exclusive,
            reason: req.reason,
            ttl_secs: req.ttl_secs,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// `GET /api/reservations` — active reservations by project or by agent.
pub async fn list(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ListReservationsQuery>,
) -> Result<Json<ListReservationsResponse>> {
    if let Some(ref agent_id) = query.agent_id {
        let mut reservations = s.store.agent_reservations(agent_id).await?;
        // Bearer keys only see their own project's claims.
        if let Some(ref authorized) = auth.project {
            reservations.retain(|r| &r.project == authorized);
        }
        return Ok(Json(ListReservationsResponse { reservations }));
    }

    let project = auth.resolve_project(query.project.as_deref())?;
    let reservations = s.store.active_reservations(&project).await?;
    Ok(Json(ListReservationsResponse { reservations }))
}

/// `GET /api/reservations/check` — evaluate conflicts without reserving.
pub async fn check(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>> {
    if query.path_pattern.is_empty() {
        return Err(Error::InvalidInput("check requires a path_pattern".to_owned()));
    }
    let project = auth.resolve_project(query.project.as_deref())?;
    let conflicts = s.store.check_conflicts(&project, &query.path_pattern, query.exclusive).await?;
    Ok(Json(CheckResponse { conflicts }))
}

/// `DELETE /api/reservations/{id}` — release a claim. Only the owner may
/// release (403 otherwise); bearer keys cannot reach other projects' rows.
pub async fn release(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>> {
    if req.agent_id.is_empty() {
        return Err(Error::InvalidInput("release requires an agent_id".to_owned()));
    }

    // Project scoping first, so a bearer key cannot probe foreign rows.
    let existing = s.store.get_reservation(&id).await?;
    auth.check_project(&existing.project)?;

    let released = s.store.release_reservation(&id, &req.agent_id).await?;
    Ok(Json(ReleaseResponse { id: released.id, released: true }))
}
