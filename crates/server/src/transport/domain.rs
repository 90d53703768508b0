// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain entity handlers: specs, epics, stories, tasks, insights, sessions,
//! and CUJs.
//!
//! Every resource follows the same contract: create (201, version 1), list,
//! get, versioned update (409 on a stale version), delete (204). Successful
//! mutations append a domain event to the log and push the same frame
//! project-wide; status transitions map to specialised event types
//! (`task.completed`, `cuj.validated`, `session.stopped`).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Cuj, Epic, EventKind, Insight, Spec, Story, Task, WorkSession};
use crate::state::AppState;
use crate::store::domain::{EntityPatch, InsightPatch, SessionPatch};
use crate::store::events::NewEvent;
use crate::transport::auth::AuthInfo;
use crate::transport::messaging::ProjectQuery;

// -- Request types -------------------------------------------------------------

/// Create-request superset shared by all domain resources; each handler reads
/// the fields its entity carries.
#[derive(Debug, Deserialize)]
pub struct CreateEntityRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub spec_id: Option<String>,
    #[serde(default)]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Update-request superset. `version` is required for versioned entities.
#[derive(Debug, Deserialize)]
pub struct UpdateEntityRequest {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub spec_id: Option<String>,
    #[serde(default)]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssignTaskRequest {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub spec_id: Option<String>,
    #[serde(default)]
    pub feature_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinksResponse {
    pub links: Vec<String>,
}

// -- Event emission ------------------------------------------------------------

/// Record a domain event and push the same frame to every project
/// subscriber. The mutation is already committed, so a logging failure here
/// is reported but does not fail the request.
async fn emit(s: &AppState, kind: EventKind, project: &str, payload: serde_json::Value) {
    if let Err(e) = s
        .store
        .append_event(NewEvent::bare(kind, project).with_payload(payload.clone()))
        .await
    {
        tracing::warn!(err = %e, kind = %kind, "failed to record domain event");
    }

    let mut frame = payload;
    frame["type"] = serde_json::json!(kind.as_str());
    frame["project"] = serde_json::json!(project);
    s.hub.broadcast(project, "", &frame).await;
}

fn fresh_id(id: Option<String>) -> String {
    id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// -- Specs ---------------------------------------------------------------------

pub async fn create_spec(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Spec>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let spec = Spec {
        id: fresh_id(req.id),
        project: project.clone(),
        title: req.title,
        description: req.description,
        status: req.status.unwrap_or_else(|| "draft".to_owned()),
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let stored = s.store.create_spec(&spec).await?;
    emit(&s, EventKind::SpecCreated, &project, serde_json::json!({"spec_id": stored.id})).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_specs(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let specs = s.store.list_specs(&project).await?;
    Ok(Json(serde_json::json!({ "specs": specs })))
}

pub async fn get_spec(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Spec>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_spec(&project, &id).await?))
}

pub async fn update_spec(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<Spec>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = EntityPatch {
        title: req.title,
        description: req.description,
        status: req.status,
        version: req.version,
        ..Default::default()
    };
    let updated = s.store.update_spec(&project, &id, &patch).await?;
    let kind = if updated.status == "archived" {
        EventKind::SpecArchived
    } else {
        EventKind::SpecUpdated
    };
    emit(&s, kind, &project, serde_json::json!({"spec_id": id})).await;
    Ok(Json(updated))
}

pub async fn delete_spec(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_spec(&project, &id).await?;
    emit(&s, EventKind::SpecArchived, &project, serde_json::json!({"spec_id": id})).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Epics ---------------------------------------------------------------------

pub async fn create_epic(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Epic>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let epic = Epic {
        id: fresh_id(req.id),
        project: project.clone(),
        spec_id: req.spec_id,
        title: req.title,
        description: req.description,
        status: req.status.unwrap_or_else(|| "draft".to_owned()),
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let stored = s.store.create_epic(&epic).await?;
    emit(&s, EventKind::EpicCreated, &project, serde_json::json!({"epic_id": stored.id})).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_epics(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let epics = s.store.list_epics(&project).await?;
    Ok(Json(serde_json::json!({ "epics": epics })))
}

pub async fn get_epic(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Epic>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_epic(&project, &id).await?))
}

pub async fn update_epic(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<Epic>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = EntityPatch {
        title: req.title,
        description: req.description,
        status: req.status,
        parent_id: req.spec_id,
        version: req.version,
        ..Default::default()
    };
    let updated = s.store.update_epic(&project, &id, &patch).await?;
    let kind = if updated.status == "archived" {
        EventKind::EpicArchived
    } else {
        EventKind::EpicUpdated
    };
    emit(&s, kind, &project, serde_json::json!({"epic_id": id})).await;
    Ok(Json(updated))
}

pub async fn delete_epic(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_epic(&project, &id).await?;
    emit(&s, EventKind::EpicArchived, &project, serde_json::json!({"epic_id": id})).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Stories -------------------------------------------------------------------

pub async fn create_story(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Story>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let story = Story {
        id: fresh_id(req.id),
        project: project.clone(),
        epic_id: req.epic_id,
        title: req.title,
        description: req.description,
        status: req.status.unwrap_or_else(|| "draft".to_owned()),
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let stored = s.store.create_story(&story).await?;
    emit(&s, EventKind::StoryCreated, &project, serde_json::json!({"story_id": stored.id})).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_stories(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let stories = s.store.list_stories(&project).await?;
    Ok(Json(serde_json::json!({ "stories": stories })))
}

pub async fn get_story(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Story>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_story(&project, &id).await?))
}

pub async fn update_story(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<Story>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = EntityPatch {
        title: req.title,
        description: req.description,
        status: req.status,
        parent_id: req.epic_id,
        version: req.version,
        ..Default::default()
    };
    let updated = s.store.update_story(&project, &id, &patch).await?;
    let kind = if updated.status == "archived" {
        EventKind::StoryArchived
    } else {
        EventKind::StoryUpdated
    };
    emit(&s, kind, &project, serde_json::json!({"story_id": id})).await;
    Ok(Json(updated))
}

pub async fn delete_story(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_story(&project, &id).await?;
    emit(&s, EventKind::StoryArchived, &project, serde_json::json!({"story_id": id})).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Tasks ---------------------------------------------------------------------

pub async fn create_task(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Task>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let task = Task {
        id: fresh_id(req.id),
        project: project.clone(),
        story_id: req.story_id,
        title: req.title,
        description: req.description,
        status: req.status.unwrap_or_else(|| "todo".to_owned()),
        assignee: req.assignee,
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let stored = s.store.create_task(&task).await?;
    emit(&s, EventKind::TaskCreated, &project, serde_json::json!({"task_id": stored.id})).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_tasks(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let tasks = s.store.list_tasks(&project).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

pub async fn get_task(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Task>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_task(&project, &id).await?))
}

pub async fn update_task(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<Task>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = EntityPatch {
        title: req.title,
        description: req.description,
        status: req.status,
        parent_id: req.story_id,
        assignee: req.assignee,
        version: req.version,
    };
    let updated = s.store.update_task(&project, &id, &patch).await?;
    let kind = if updated.status == "done" {
        EventKind::TaskCompleted
    } else {
        EventKind::TaskUpdated
    };
    emit(
        &s,
        kind,
        &project,
        serde_json::json!({"task_id": id, "status": updated.status}),
    )
    .await;
    Ok(Json(updated))
}

/// `POST /api/tasks/{id}/assign` — hand a task to an agent.
pub async fn assign_task(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<AssignTaskRequest>,
) -> Result<Json<Task>> {
    if req.assignee.is_empty() {
        return Err(Error::InvalidInput("assignment requires an assignee".to_owned()));
    }
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = EntityPatch {
        assignee: Some(req.assignee.clone()),
        version: req.version,
        ..Default::default()
    };
    let updated = s.store.update_task(&project, &id, &patch).await?;
    emit(
        &s,
        EventKind::TaskAssigned,
        &project,
        serde_json::json!({"task_id": id, "assignee": req.assignee}),
    )
    .await;
    Ok(Json(updated))
}

pub async fn delete_task(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_task(&project, &id).await?;
    emit(&s, EventKind::TaskDeleted, &project, serde_json::json!({"task_id": id})).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Insights ------------------------------------------------------------------

pub async fn create_insight(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Insight>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let insight = Insight {
        id: fresh_id(req.id),
        project: project.clone(),
        spec_id: req.spec_id,
        title: req.title,
        body: req.body.unwrap_or_default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let stored = s.store.create_insight(&insight).await?;
    emit(&s, EventKind::InsightCreated, &project, serde_json::json!({"insight_id": stored.id}))
        .await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_insights(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let insights = s.store.list_insights(&project).await?;
    Ok(Json(serde_json::json!({ "insights": insights })))
}

pub async fn get_insight(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Insight>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_insight(&project, &id).await?))
}

pub async fn update_insight(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<Insight>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let linked = req.spec_id.is_some();
    let patch = InsightPatch { title: req.title, body: req.body, spec_id: req.spec_id };
    let updated = s.store.update_insight(&project, &id, &patch).await?;
    if linked {
        emit(
            &s,
            EventKind::InsightLinked,
            &project,
            serde_json::json!({"insight_id": id, "spec_id": updated.spec_id}),
        )
        .await;
    }
    Ok(Json(updated))
}

/// `POST /api/insights/{id}/link` — attach an insight to a spec.
pub async fn link_insight(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<Insight>> {
    let Some(spec_id) = req.spec_id else {
        return Err(Error::InvalidInput("link requires a spec_id".to_owned()));
    };
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = InsightPatch { spec_id: Some(spec_id.clone()), ..Default::default() };
    let updated = s.store.update_insight(&project, &id, &patch).await?;
    emit(
        &s,
        EventKind::InsightLinked,
        &project,
        serde_json::json!({"insight_id": id, "spec_id": spec_id}),
    )
    .await;
    Ok(Json(updated))
}

pub async fn delete_insight(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_insight(&project, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Sessions ------------------------------------------------------------------

pub async fn create_session(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<WorkSession>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let session = WorkSession {
        id: fresh_id(req.id),
        project: project.clone(),
        agent_id: req.agent_id,
        name: req.name.unwrap_or_default(),
        status: "running".to_owned(),
        started_at: Utc::now(),
        stopped_at: None,
    };
    let stored = s.store.create_session(&session).await?;
    emit(
        &s,
        EventKind::SessionStarted,
        &project,
        serde_json::json!({"session_id": stored.id, "agent_id": stored.agent_id}),
    )
    .await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_sessions(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let sessions = s.store.list_sessions(&project).await?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

pub async fn get_session(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<WorkSession>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_session(&project, &id).await?))
}

pub async fn update_session(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<WorkSession>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let stopping = req.status.as_deref() == Some("stopped");
    let patch = SessionPatch { name: req.name, status: req.status };
    let updated = s.store.update_session(&project, &id, &patch).await?;
    if stopping {
        emit(
            &s,
            EventKind::SessionStopped,
            &project,
            serde_json::json!({"session_id": id}),
        )
        .await;
    }
    Ok(Json(updated))
}

pub async fn delete_session(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_session(&project, &id).await?;
    emit(&s, EventKind::SessionStopped, &project, serde_json::json!({"session_id": id})).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- CUJs ----------------------------------------------------------------------

pub async fn create_cuj(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Cuj>)> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let cuj = Cuj {
        id: fresh_id(req.id),
        project: project.clone(),
        spec_id: req.spec_id,
        title: req.title,
        description: req.description,
        status: req.status.unwrap_or_else(|| "draft".to_owned()),
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let stored = s.store.create_cuj(&cuj).await?;
    emit(&s, EventKind::CujCreated, &project, serde_json::json!({"cuj_id": stored.id})).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_cujs(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<serde_json::Value>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    let cujs = s.store.list_cujs(&project).await?;
    Ok(Json(serde_json::json!({ "cujs": cujs })))
}

pub async fn get_cuj(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Cuj>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    Ok(Json(s.store.get_cuj(&project, &id).await?))
}

pub async fn update_cuj(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<Json<Cuj>> {
    let project = auth.resolve_project(req.project.as_deref())?;
    let patch = EntityPatch {
        title: req.title,
        description: req.description,
        status: req.status,
        parent_id: req.spec_id,
        version: req.version,
        ..Default::default()
    };
    let updated = s.store.update_cuj(&project, &id, &patch).await?;
    let kind = match updated.status.as_str() {
        "validated" => EventKind::CujValidated,
        "archived" => EventKind::CujArchived,
        _ => EventKind::CujUpdated,
    };
    emit(&s, kind, &project, serde_json::json!({"cuj_id": id, "status": updated.status})).await;
    Ok(Json(updated))
}

pub async fn delete_cuj(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<StatusCode> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.delete_cuj(&project, &id).await?;
    emit(&s, EventKind::CujArchived, &project, serde_json::json!({"cuj_id": id})).await;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/cujs/{id}/link` — attach a feature to a CUJ.
pub async fn link_cuj(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<LinksResponse>> {
    let Some(feature_id) = req.feature_id else {
        return Err(Error::InvalidInput("link requires a feature_id".to_owned()));
    };
    let project = auth.resolve_project(req.project.as_deref())?;
    s.store.link_cuj_feature(&project, &id, &feature_id).await?;
    emit(
        &s,
        EventKind::CujUpdated,
        &project,
        serde_json::json!({"cuj_id": id, "feature_id": feature_id}),
    )
    .await;
    let links = s.store.cuj_feature_links(&project, &id).await?;
    Ok(Json(LinksResponse { links }))
}

/// `POST /api/cujs/{id}/unlink` — detach a feature from a CUJ.
pub async fn unlink_cuj(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<LinksResponse>> {
    let Some(feature_id) = req.feature_id else {
        return Err(Error::InvalidInput("unlink requires a feature_id".to_owned()));
    };
    let project = auth.resolve_project(req.project.as_deref())?;
    s.store.unlink_cuj_feature(&project, &id, &feature_id).await?;
    emit(
        &s,
        EventKind::CujUpdated,
        &project,
        serde_json::json!({"cuj_id": id, "feature_id": feature_id}),
    )
    .await;
    let links = s.store.cuj_feature_links(&project, &id).await?;
    Ok(Json(LinksResponse { links }))
}

/// `GET /api/cujs/{id}/links`
pub async fn cuj_links(
    State(s): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<LinksResponse>> {
    let project = auth.resolve_project(query.project.as_deref())?;
    s.store.get_cuj(&project, &id).await?;
    let links = s.store.cuj_feature_links(&project, &id).await?;
    Ok(Json(LinksResponse { links }))
}
