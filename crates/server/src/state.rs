// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use crate::config::ServeConfig;
use crate::hub::Hub;
use crate::keys::Keyring;
use crate::resilient::ResilientStore;

/// Shared server state, built once at startup and passed down by reference.
pub struct AppState {
    pub store: ResilientStore,
    pub hub: Hub,
    pub keyring: Keyring,
    pub config: ServeConfig,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: ResilientStore,
        keyring: Keyring,
        config: ServeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self { store, hub: Hub::default(), keyring, config, shutdown }
    }
}
