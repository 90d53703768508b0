// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the coordination service.

pub mod agents;
pub mod auth;
pub mod domain;
pub mod messaging;
pub mod reservations;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// `GET /api/health` — liveness probe, exempt from auth.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the axum `Router` with every route of the service.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/health", get(health))
        // Agents
        .route("/api/agents", post(agents::register).get(agents::list))
        .route("/api/agents/{id}/heartbeat", post(agents::heartbeat))
        .route("/api/agents/{id}/metadata", patch(agents::patch_metadata))
        // Messaging
        .route("/api/messages", post(messaging::send_message))
        .route("/api/messages/{id}/{action}", post(messaging::message_action))
        .route("/api/inbox/{agent}", get(messaging::inbox))
        .route("/api/inbox/{agent}/counts", get(messaging::inbox_counts))
        .route("/api/threads", get(messaging::list_threads))
        .route("/api/threads/{id}", get(messaging::thread_messages))
        .route("/api/events", get(messaging::events))
        // Reservations
        .route("/api/reservations", post(reservations::reserve).get(reservations::list))
        .route("/api/reservations/check", get(reservations::check))
        .route("/api/reservations/{id}", delete(reservations::release))
        // Specs
        .route("/api/specs", post(domain::create_spec).get(domain::list_specs))
        .route(
            "/api/specs/{id}",
            get(domain::get_spec).put(domain::update_spec).delete(domain::delete_spec),
        )
        // Epics
        .route("/api/epics", post(domain::create_epic).get(domain::list_epics))
        .route(
            "/api/epics/{id}",
            get(domain::get_epic).put(domain::update_epic).delete(domain::delete_epic),
        )
        // Stories
        .route("/api/stories", post(domain::create_story).get(domain::list_stories))
        .route(
            "/api/stories/{id}",
            get(domain::get_story).put(domain::update_story).delete(domain::delete_story),
        )
        // Tasks
        .route("/api/tasks", post(domain::create_task).get(domain::list_tasks))
        .route(
            "/api/tasks/{id}",
            get(domain::get_task).put(domain::update_task).delete(domain::delete_task),
        )
        .route("/api/tasks/{id}/assign", post(domain::assign_task))
        // Insights
        .route("/api/insights", post(domain::create_insight).get(domain::list_insights))
        .route(
            "/api/insights/{id}",
            get(domain::get_insight).put(domain::update_insight).delete(domain::delete_insight),
        )
        .route("/api/insights/{id}/link", post(domain::link_insight))
        // Sessions
        .route("/api/sessions", post(domain::create_session).get(domain::list_sessions))
        .route(
            "/api/sessions/{id}",
            get(domain::get_session)
                .put(domain::update_session)
                .delete(domain::delete_session),
        )
        // CUJs
        .route("/api/cujs", post(domain::create_cuj).get(domain::list_cujs))
        .route(
            "/api/cujs/{id}",
            get(domain::get_cuj).put(domain::update_cuj).delete(domain::delete_cuj),
        )
        .route("/api/cujs/{id}/link", post(domain::link_cuj))
        .route("/api/cujs/{id}/unlink", post(domain::unlink_cuj))
        .route("/api/cujs/{id}/links", get(domain::cuj_links))
        // Push channel
        .route("/ws/agents/{agent}", get(ws::ws_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
