// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request authentication: loopback bypass or bearer key, resolved once in
//! middleware and attached to the request as [`AuthInfo`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::Error;
use crate::state::AppState;

/// Marker inserted on connections accepted from the Unix socket; a UDS peer
/// is local by construction.
#[derive(Debug, Clone, Copy)]
pub struct UnixPeer;

/// How the request authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Loopback peer with the loopback bypass policy enabled. No project is
    /// implied; handlers honour an explicit `project` parameter.
    Loopback,
    /// Bearer key resolved against the keyring.
    Bearer,
}

/// Authentication result attached to every request.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub mode: AuthMode,
    /// The project the bearer key is scoped to; `None` in loopback mode.
    pub project: Option<String>,
}

impl AuthInfo {
    /// Resolve the effective project for a request.
    ///
    /// Bearer mode requires the request to name its project and name it
    /// correctly; anything else is a 403. Loopback mode takes the request's
    /// word for it (empty string when unspecified).
    pub fn resolve_project(&self, requested: Option<&str>) -> Result<String, Error> {
        match (&self.mode, &self.project) {
            (AuthMode::Bearer, Some(authorized)) => match requested {
                Some(r) if r == authorized => Ok(authorized.clone()),
                Some(r) => Err(Error::ForbiddenProject(format!(
                    "key is not authorised for project {r:?}"
                ))),
                None => Err(Error::ForbiddenProject(
                    "bearer requests must name their project".to_owned(),
                )),
            },
            _ => Ok(requested.unwrap_or("").to_owned()),
        }
    }

    /// The project scope used for store-side filters: the authorised project
    /// in bearer mode, unscoped (empty) for loopback.
    pub fn scope(&self) -> &str {
        self.project.as_deref().unwrap_or("")
    }

    /// Check that a stored record's project is reachable by this identity.
    pub fn check_project(&self, record_project: &str) -> Result<(), Error> {
        match (&self.mode, &self.project) {
            (AuthMode::Bearer, Some(authorized)) if authorized != record_project => {
                Err(Error::ForbiddenProject(format!(
                    "key is not authorised for project {record_project:?}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Whether the request arrived from a local peer. The socket address comes
/// from the accepted connection; a forwarded-for header is never accepted as
/// evidence of loopback.
fn peer_is_local(req: &Request<axum::body::Body>) -> bool {
    if req.extensions().get::<UnixPeer>().is_some() {
        return true;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .is_some_and(|ci| ci.0.ip().is_loopback())
}

/// Axum middleware that authenticates every request.
///
/// Exempt: `/api/health` (used by probes before any key exists).
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/api/health" {
        return next.run(req).await;
    }

    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_owned);

    let info = match bearer {
        Some(key) => match state.keyring.project_for(&key) {
            Some(project) => {
                AuthInfo { mode: AuthMode::Bearer, project: Some(project.to_owned()) }
            }
            None => return Error::Unauthorized.into_response(),
        },
        None if peer_is_local(&req) && state.keyring.allow_loopback => {
            AuthInfo { mode: AuthMode::Loopback, project: None }
        }
        None => return Error::Unauthorized.into_response(),
    };

    req.extensions_mut().insert(info);
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
