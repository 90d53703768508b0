// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard: project-scoped coordination service for automated agents.
//!
//! Agents exchange durable messages through an append-only event log, claim
//! workspace paths with glob-pattern reservations, and observe domain
//! changes over a streaming push channel. All state is partitioned by an
//! opaque project string.

pub mod breaker;
pub mod config;
pub mod error;
pub mod glob;
pub mod hub;
pub mod keys;
pub mod model;
pub mod resilient;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Extension;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServeConfig;
use crate::resilient::ResilientStore;
use crate::state::AppState;
use crate::store::Store;
use crate::transport::auth::UnixPeer;
use crate::transport::build_router;

/// How long in-flight requests may drain after the shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Run the server until shutdown.
///
/// Start order: store → sweeper → listeners. Shutdown order: stop accepting,
/// stop the sweeper, drain HTTP with a deadline, close the store last (the
/// final disconnect checkpoints the WAL).
pub async fn run(config: ServeConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let keyring = keys::load_or_bootstrap(&config.keys_file)?;
    let store = Store::open(&config.db).await?;
    let state = Arc::new(AppState::new(
        ResilientStore::with_defaults(store.clone()),
        keyring,
        config.clone(),
        shutdown.clone(),
    ));

    let sweeper_handle = sweeper::spawn(Arc::clone(&state));
    let router = build_router(Arc::clone(&state));

    // TCP listener.
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("switchboard listening on {}", listener.local_addr()?);
    let http_task = {
        let sd = shutdown.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let result = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(sd.cancelled_owned())
            .await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        })
    };

    // Unix socket listener (optional), same handler. UDS peers are local by
    // construction, so requests carry the UnixPeer marker for the auth layer.
    let uds_task = match config.socket {
        Some(ref socket_path) => {
            let path = socket_path.clone();
            let _ = std::fs::remove_file(&path); // stale socket from a crash
            let uds_listener = tokio::net::UnixListener::bind(&path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o660))?;
            }
            info!("unix socket listening on {}", path.display());

            let router = router.layer(Extension(UnixPeer));
            let sd = shutdown.clone();
            Some(tokio::spawn(async move {
                let mut make_svc = router.into_make_service();
                loop {
                    tokio::select! {
                        _ = sd.cancelled() => break,
                        accept = uds_listener.accept() => {
                            match accept {
                                Ok((stream, _)) => {
                                    let svc_future =
                                        <_ as tower::Service<_>>::call(&mut make_svc, ());
                                    tokio::spawn(async move {
                                        let Ok(svc) = svc_future.await;
                                        let io = hyper_util::rt::TokioIo::new(stream);
                                        let hyper_svc =
                                            hyper_util::service::TowerToHyperService::new(svc);
                                        let _ = hyper_util::server::conn::auto::Builder::new(
                                            hyper_util::rt::TokioExecutor::new(),
                                        )
                                        .serve_connection_with_upgrades(io, hyper_svc)
                                        .await;
                                    });
                                }
                                Err(e) => {
                                    tracing::debug!("unix socket accept error: {e}");
                                }
                            }
                        }
                    }
                }
                let _ = std::fs::remove_file(&path);
            }))
        }
        None => None,
    };

    spawn_signal_handler(shutdown.clone());

    // Park until something requests shutdown.
    shutdown.cancelled().await;
    info!("shutting down");

    // Listeners have stopped accepting; sweeper exits on the same token.
    let _ = sweeper_handle.await;
    let _ = tokio::time::timeout(DRAIN_DEADLINE, http_task).await;
    if let Some(task) = uds_task {
        let _ = tokio::time::timeout(DRAIN_DEADLINE, task).await;
    }
    store.close().await;
    info!("store closed");
    Ok(())
}

/// First SIGINT/SIGTERM cancels the token for a graceful shutdown; a second
/// one force-exits.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
