// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Configuration for the `serve` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct ServeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "SWITCHBOARD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7777, env = "SWITCHBOARD_PORT")]
    pub port: u16,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "switchboard.db", env = "SWITCHBOARD_DB")]
    pub db: PathBuf,

    /// Unix domain socket to serve in parallel with TCP, if set.
    #[arg(long, env = "SWITCHBOARD_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Path to the JSON keys file (generated with project `dev` if missing).
    #[arg(long, default_value = "switchboard-keys.json", env = "SWITCHBOARD_KEYS_FILE")]
    pub keys_file: PathBuf,

    /// Reservation sweep interval in seconds.
    #[arg(long, default_value_t = 60, env = "SWITCHBOARD_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// Heartbeat grace in seconds before a silent agent's reservations are
    /// reclaimed.
    #[arg(long, default_value_t = 300, env = "SWITCHBOARD_SWEEP_GRACE_SECS")]
    pub sweep_grace_secs: i64,

    /// Log output format: `text` or `json`.
    #[arg(long, default_value = "text", env = "SWITCHBOARD_LOG_FORMAT")]
    pub log_format: String,

    /// Log level filter when RUST_LOG is unset.
    #[arg(long, default_value = "info", env = "SWITCHBOARD_LOG_LEVEL")]
    pub log_level: String,
}

impl ServeConfig {
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sweep_grace_secs)
    }
}
