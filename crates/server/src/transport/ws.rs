// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming push endpoint: `GET /ws/agents/{agent}?project=…`.
//!
//! The channel is server→client only. Client frames are read and dropped;
//! a read error or close detaches the subscriber. Missed frames are not
//! replayed — clients resync through the durable inbox and their cursor.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::AppState;
use crate::transport::auth::AuthInfo;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub project: Option<String>,
}

/// `GET /ws/agents/{agent}` — WebSocket upgrade for a push subscriber.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthInfo>,
    Path(agent): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Same project rules as HTTP: bearer keys must name their project.
    let project = match auth.resolve_project(query.project.as_deref()) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| handle_subscriber(state, socket, project, agent))
}

/// Per-connection loop: forward hub frames, drop client frames.
async fn handle_subscriber(state: Arc<AppState>, socket: WebSocket, project: String, agent: String) {
    let mut sub = state.hub.subscribe(&project, &agent);
    let write_deadline = state.hub.write_deadline();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            frame = sub.rx.recv() => {
                match frame {
                    Some(text) => {
                        // The deadline bounds the socket write itself: a
                        // client that stopped reading jams its TCP buffers,
                        // and this send would otherwise block past any
                        // select! poll. Exceeding it closes the subscriber.
                        let write = ws_tx.send(Message::Text(text.into()));
                        match tokio::time::timeout(write_deadline, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => break,
                            Err(_) => {
                                tracing::warn!(
                                    project = %sub.project,
                                    agent = %sub.agent,
                                    "push write exceeded deadline, dropping subscriber"
                                );
                                break;
                            }
                        }
                    }
                    // Hub dropped us (slow subscriber).
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    // Server→client only: client frames are discarded.
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {}
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.hub.unsubscribe(&sub.project, &sub.agent, sub.id);
    tracing::debug!(project = %sub.project, agent = %sub.agent, "push subscriber detached");
}
