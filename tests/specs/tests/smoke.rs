// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `switchboard` binary and
//! exercise HTTP, WebSocket push, Unix socket, auth, expiry sweeping, and
//! graceful shutdown.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use switchboard_specs::{ServerProcess, ALPHA_KEY};

const TIMEOUT: Duration = Duration::from_secs(10);

// -- HTTP (TCP) ---------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/health", server.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn send_and_pull() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let register: serde_json::Value = client
        .post(format!("{}/api/agents", server.base_url()))
        .json(&serde_json::json!({"name": "bob", "project": "p"}))
        .send()
        .await?
        .json()
        .await?;
    assert!(register["agent_id"].is_string());

    let sent: serde_json::Value = client
        .post(format!("{}/api/messages", server.base_url()))
        .json(&serde_json::json!({
            "project": "p", "from": "alice", "to": ["bob"], "body": "hi"
        }))
        .send()
        .await?
        .json()
        .await?;
    let message_id = sent["message_id"].as_str().unwrap_or_default().to_owned();
    let cursor = sent["cursor"].as_u64().unwrap_or_default();
    assert!(cursor > 0);

    let inbox: serde_json::Value = client
        .get(format!("{}/api/inbox/bob?since_cursor=0&project=p", server.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(inbox["messages"][0]["id"], message_id.as_str());
    assert_eq!(inbox["messages"][0]["body"], "hi");
    assert_eq!(inbox["cursor"], cursor);
    Ok(())
}

// -- WebSocket push ------------------------------------------------------------

#[tokio::test]
async fn push_delivery_beats_the_pull() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("bob", "p")).await?;

    let client = reqwest::Client::new();
    let sent: serde_json::Value = client
        .post(format!("{}/api/messages", server.base_url()))
        .json(&serde_json::json!({
            "project": "p", "from": "alice", "to": ["bob"], "body": "pushed"
        }))
        .send()
        .await?
        .json()
        .await?;

    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    let text = match msg {
        Message::Text(t) => t.to_string(),
        other => anyhow::bail!("expected text ws message, got: {other:?}"),
    };
    let frame: serde_json::Value = serde_json::from_str(&text)?;

    assert_eq!(frame["type"], "message.created");
    assert_eq!(frame["project"], "p");
    assert_eq!(frame["agent"], "bob");
    assert_eq!(frame["message_id"], sent["message_id"]);
    assert_eq!(frame["cursor"], sent["cursor"]);

    // The durable inbox already has the message the frame announced.
    let inbox: serde_json::Value = client
        .get(format!("{}/api/inbox/bob?project=p", server.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(inbox["messages"][0]["id"], sent["message_id"]);
    Ok(())
}

#[tokio::test]
async fn push_ignores_client_frames() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("bob", "p")).await?;
    use futures_util::SinkExt;
    ws.send(Message::Text(r#"{"type":"ignore-me"}"#.into())).await?;

    // The channel stays healthy: a subsequent broadcast still arrives.
    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/messages", server.base_url()))
        .json(&serde_json::json!({
            "project": "p", "from": "alice", "to": ["bob"], "body": "still here"
        }))
        .send()
        .await?;

    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    let text = match msg {
        Message::Text(t) => t.to_string(),
        other => anyhow::bail!("expected text ws message, got: {other:?}"),
    };
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["type"], "message.created");
    Ok(())
}

#[tokio::test]
async fn stalled_push_write_drops_the_subscriber() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    // A subscriber that never reads: its TCP buffers fill and the server's
    // socket writes jam.
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("bob", "p")).await?;

    // 48 MiB total: far beyond what loopback TCP buffers can absorb, while
    // staying under the hub's per-subscriber frame queue.
    let client = reqwest::Client::new();
    let big = "x".repeat(1024 * 1024);
    for _ in 0..48 {
        client
            .post(format!("{}/api/messages", server.base_url()))
            .json(&serde_json::json!({
                "project": "p", "from": "alice", "to": ["bob"], "body": big
            }))
            .send()
            .await?
            .error_for_status()?;
    }

    // Senders were never backpressured: the service answers immediately.
    let resp = reqwest::get(format!("{}/api/health", server.base_url())).await?;
    anyhow::ensure!(resp.status().is_success());

    // The write deadline cuts the stalled connection; once we finally drain
    // our buffered frames the stream must end instead of hanging forever.
    let drain = async {
        while let Some(msg) = ws.next().await {
            if msg.is_err() {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(15), drain)
        .await
        .map_err(|_| anyhow::anyhow!("server never closed the stalled subscriber"))?;

    // The durable inbox still has every message for recovery.
    let counts: serde_json::Value = client
        .get(format!("{}/api/inbox/bob/counts?project=p", server.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(counts["total"], 48);
    Ok(())
}

// -- Sweeper -------------------------------------------------------------------

#[tokio::test]
async fn sweeper_expires_and_notifies() -> anyhow::Result<()> {
    let server = ServerProcess::build().sweep_interval(1).spawn()?;
    server.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("watcher", "p")).await?;

    let client = reqwest::Client::new();
    let created: serde_json::Value = client
        .post(format!("{}/api/reservations", server.base_url()))
        .json(&serde_json::json!({
            "agent_id": "a1", "project": "p",
            "path_pattern": "src/*.rs", "exclusive": true, "ttl_secs": -1
        }))
        .send()
        .await?
        .json()
        .await?;
    let reservation_id = created["id"].as_str().unwrap_or_default().to_owned();

    // Within a couple of sweep ticks the expiry frame arrives.
    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    let text = match msg {
        Message::Text(t) => t.to_string(),
        other => anyhow::bail!("expected text ws message, got: {other:?}"),
    };
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["type"], "reservation.expired");
    assert_eq!(frame["project"], "p");
    assert_eq!(frame["reservation_id"], reservation_id.as_str());

    let listed: serde_json::Value = client
        .get(format!("{}/api/reservations?project=p", server.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed["reservations"].as_array().map(Vec::len), Some(0));
    Ok(())
}

// -- Auth over real TCP --------------------------------------------------------

#[tokio::test]
async fn bearer_required_when_loopback_bypass_disabled() -> anyhow::Result<()> {
    let server = ServerProcess::build().require_auth().spawn()?;
    server.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let denied = client.get(format!("{}/api/agents", server.base_url())).send().await?;
    assert_eq!(denied.status().as_u16(), 401);

    let allowed = client
        .get(format!("{}/api/agents?project=alpha", server.base_url()))
        .bearer_auth(ALPHA_KEY)
        .send()
        .await?;
    assert_eq!(allowed.status().as_u16(), 200);

    let foreign = client
        .get(format!("{}/api/agents?project=beta", server.base_url()))
        .bearer_auth(ALPHA_KEY)
        .send()
        .await?;
    assert_eq!(foreign.status().as_u16(), 403);
    Ok(())
}

// -- Unix socket ---------------------------------------------------------------

#[tokio::test]
async fn socket_serves_the_same_handler() -> anyhow::Result<()> {
    let server = ServerProcess::build().no_tcp().spawn()?;
    server.wait_healthy(TIMEOUT).await?;
    let socket_path =
        server.socket_path().ok_or_else(|| anyhow::anyhow!("no socket path"))?;

    let health = switchboard_specs::unix_http_get(socket_path, "/api/health").await?;
    let parsed: serde_json::Value = serde_json::from_str(&health)?;
    assert_eq!(parsed["status"], "ok");

    // A UDS peer counts as local: mutations work without a bearer key.
    let sent = switchboard_specs::unix_http_post(
        socket_path,
        "/api/messages",
        &serde_json::json!({
            "project": "p", "from": "alice", "to": ["bob"], "body": "via socket"
        }),
    )
    .await?;
    let parsed: serde_json::Value = serde_json::from_str(&sent)?;
    assert!(parsed["message_id"].is_string());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn socket_file_mode_is_group_writable() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let server = ServerProcess::build().no_tcp().spawn()?;
    server.wait_healthy(TIMEOUT).await?;
    let socket_path =
        server.socket_path().ok_or_else(|| anyhow::anyhow!("no socket path"))?;

    let mode = std::fs::metadata(socket_path)?.permissions().mode() & 0o777;
    assert_eq!(mode, 0o660);
    Ok(())
}

// -- Shutdown ------------------------------------------------------------------

#[tokio::test]
async fn sigterm_shuts_down_cleanly() -> anyhow::Result<()> {
    let mut server = ServerProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    server.terminate()?;
    let status = server.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "expected clean exit, got {status:?}");
    Ok(())
}

#[tokio::test]
async fn state_survives_restart() -> anyhow::Result<()> {
    let mut server = ServerProcess::build().spawn()?;
    server.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/messages", server.base_url()))
        .json(&serde_json::json!({
            "project": "p", "from": "alice", "to": ["bob"], "body": "durable"
        }))
        .send()
        .await?;

    server.terminate()?;
    server.wait_exit(TIMEOUT).await?;

    // Reopen the same database on a fresh port.
    let db = server.state_dir().join("switchboard.db");
    let keys = server.state_dir().join("keys.json");
    let port = switchboard_specs::free_port()?;
    let binary = switchboard_specs::server_binary();
    let mut child = std::process::Command::new(&binary)
        .args([
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--db",
            &db.to_string_lossy(),
            "--keys-file",
            &keys.to_string_lossy(),
            "--log-level",
            "warn",
        ])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    let url = format!("http://127.0.0.1:{port}/api/inbox/bob?project=p");
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let inbox = loop {
        if tokio::time::Instant::now() > deadline {
            let _ = child.kill();
            anyhow::bail!("restarted server never answered");
        }
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                break resp.json::<serde_json::Value>().await?;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    let _ = child.kill();
    let _ = child.wait();

    assert_eq!(inbox["messages"][0]["body"], "durable");
    Ok(())
}

// -- CLI -----------------------------------------------------------------------

#[tokio::test]
async fn init_writes_a_keys_file_once() -> anyhow::Result<()> {
    let binary = switchboard_specs::server_binary();
    anyhow::ensure!(binary.exists(), "switchboard binary not found");
    let tmp = tempfile::tempdir()?;
    let keys_file = tmp.path().join("keys.json");

    let output = std::process::Command::new(&binary)
        .args(["init", "--project", "myproj", "--keys-file", &keys_file.to_string_lossy()])
        .output()?;
    anyhow::ensure!(output.status.success(), "init failed: {output:?}");

    let key = String::from_utf8(output.stdout)?.trim().to_owned();
    assert_eq!(key.len(), 43);

    let contents: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&keys_file)?)?;
    assert_eq!(contents["projects"]["myproj"]["keys"][0], key.as_str());

    // A second init must refuse to clobber the file.
    let again = std::process::Command::new(&binary)
        .args(["init", "--project", "other", "--keys-file", &keys_file.to_string_lossy()])
        .output()?;
    anyhow::ensure!(!again.status.success(), "second init should fail");
    Ok(())
}
