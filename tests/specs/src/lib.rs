// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `switchboard` binary as a subprocess and exercises it
//! over HTTP, WebSocket, and Unix socket transports.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Bearer key the harness provisions for project `alpha`.
pub const ALPHA_KEY: &str = "spec-alpha-key";

/// Bearer key the harness provisions for project `beta`.
pub const BETA_KEY: &str = "spec-beta-key";

/// Resolve the path to the compiled `switchboard` binary.
pub fn server_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("switchboard")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Make a raw HTTP/1.1 request over a Unix socket, returning the response body.
pub async fn unix_http_get(socket_path: &Path, path: &str) -> anyhow::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;

    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_string();
    Ok(body)
}

/// POST a JSON body over a Unix socket, returning the response body.
pub async fn unix_http_post(
    socket_path: &Path,
    path: &str,
    json: &serde_json::Value,
) -> anyhow::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let payload = json.to_string();
    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;

    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_string();
    Ok(body)
}

/// A running `switchboard serve` process, killed on drop.
pub struct ServerProcess {
    child: Child,
    port: Option<u16>,
    socket_path: Option<PathBuf>,
    state_dir: tempfile::TempDir,
}

/// Builder configuring the spawned server.
pub struct ServerBuilder {
    tcp: bool,
    socket: bool,
    allow_loopback: bool,
    sweep_interval_secs: u64,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self { tcp: true, socket: false, allow_loopback: true, sweep_interval_secs: 60 }
    }
}

impl ServerBuilder {
    /// Disable the TCP listener.
    pub fn no_tcp(mut self) -> Self {
        self.tcp = false;
        self.socket = true;
        self
    }

    /// Also serve on a Unix socket in a temp dir.
    pub fn socket(mut self) -> Self {
        self.socket = true;
        self
    }

    /// Provision a keys file that forbids loopback bypass, so every request
    /// must present a bearer key.
    pub fn require_auth(mut self) -> Self {
        self.allow_loopback = false;
        self
    }

    /// Shorten the sweep interval (default 60 s) for expiry tests.
    pub fn sweep_interval(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Spawn `switchboard serve` with this configuration.
    pub fn spawn(self) -> anyhow::Result<ServerProcess> {
        let binary = server_binary();
        anyhow::ensure!(binary.exists(), "switchboard binary not found at {}", binary.display());

        let state_dir = tempfile::tempdir()?;
        let db_path = state_dir.path().join("switchboard.db");
        let keys_path = state_dir.path().join("keys.json");
        std::fs::write(
            &keys_path,
            serde_json::json!({
                "default_policy": { "allow_localhost_without_auth": self.allow_loopback },
                "projects": {
                    "alpha": { "keys": [ALPHA_KEY] },
                    "beta": { "keys": [BETA_KEY] }
                }
            })
            .to_string(),
        )?;

        let port = if self.tcp { Some(free_port()?) } else { None };
        let socket_path = self.socket.then(|| state_dir.path().join("switchboard.sock"));

        let mut args: Vec<String> = vec![
            "serve".into(),
            "--host".into(),
            "127.0.0.1".into(),
            "--db".into(),
            db_path.to_string_lossy().into_owned(),
            "--keys-file".into(),
            keys_path.to_string_lossy().into_owned(),
            "--sweep-interval-secs".into(),
            self.sweep_interval_secs.to_string(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(p) = port {
            args.extend(["--port".into(), p.to_string()]);
        }
        if let Some(ref p) = socket_path {
            args.extend(["--socket".into(), p.to_string_lossy().into_owned()]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(ServerProcess { child, port, socket_path, state_dir })
    }
}

impl ServerProcess {
    /// Create a builder for custom configuration.
    pub fn build() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Spawn with the default TCP-only, loopback-bypass configuration.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The TCP port (if enabled).
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The Unix socket path (if enabled).
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Directory holding the db and keys file for this process.
    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    /// Base URL for HTTP requests (requires TCP).
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port.unwrap_or(0))
    }

    /// Push-channel URL for an agent (requires TCP).
    pub fn ws_url(&self, agent: &str, project: &str) -> String {
        format!("ws://127.0.0.1:{}/ws/agents/{agent}?project={project}", self.port.unwrap_or(0))
    }

    /// Poll health until responsive, over TCP or the Unix socket.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        if let Some(port) = self.port {
            let client = reqwest::Client::new();
            let url = format!("http://127.0.0.1:{port}/api/health");
            loop {
                if tokio::time::Instant::now() > deadline {
                    anyhow::bail!("switchboard did not become healthy within {timeout:?}");
                }
                if let Ok(resp) = client.get(&url).send().await {
                    if resp.status().is_success() {
                        return Ok(());
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } else if let Some(ref socket_path) = self.socket_path {
            loop {
                if tokio::time::Instant::now() > deadline {
                    anyhow::bail!("switchboard did not become healthy within {timeout:?}");
                }
                if let Ok(body) = unix_http_get(socket_path, "/api/health").await {
                    if body.contains("ok") {
                        return Ok(());
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } else {
            anyhow::bail!("no transport available for health check");
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> anyhow::Result<()> {
        let status = Command::new("kill")
            .args(["-TERM", &self.child.id().to_string()])
            .status()?;
        anyhow::ensure!(status.success(), "kill -TERM failed");
        Ok(())
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("switchboard did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
