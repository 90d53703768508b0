// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{bootstrap, generate_key, load, load_or_bootstrap};

#[test]
fn bootstrap_then_load_round_trips() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("keys.json");

    let key = bootstrap(&path, "alpha")?;
    let ring = load(&path)?;

    assert!(ring.allow_loopback);
    assert_eq!(ring.project_for(&key), Some("alpha"));
    assert_eq!(ring.project_for("not-a-key"), None);
    Ok(())
}

#[test]
fn bootstrap_refuses_to_overwrite() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("keys.json");

    bootstrap(&path, "alpha")?;
    assert!(bootstrap(&path, "beta").is_err());
    Ok(())
}

#[cfg(unix)]
#[test]
fn bootstrap_sets_owner_only_mode() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("keys.json");
    bootstrap(&path, "alpha")?;

    let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
    Ok(())
}

#[test]
fn duplicate_key_across_projects_is_fatal() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("keys.json");
    std::fs::write(
        &path,
        r#"{
            "default_policy": {"allow_localhost_without_auth": false},
            "projects": {
                "a": {"keys": ["shared"]},
                "b": {"keys": ["shared"]}
            }
        }"#,
    )?;

    let err = match load(&path) {
        Err(e) => e.to_string(),
        Ok(_) => String::new(),
    };
    assert!(err.contains("reused"), "unexpected: {err}");
    Ok(())
}

#[test]
fn same_project_may_hold_many_keys() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("keys.json");
    std::fs::write(
        &path,
        r#"{"projects": {"a": {"keys": ["one", "two"]}}}"#,
    )?;

    let ring = load(&path)?;
    assert!(!ring.allow_loopback);
    assert_eq!(ring.project_for("one"), Some("a"));
    assert_eq!(ring.project_for("two"), Some("a"));
    Ok(())
}

#[test]
fn load_or_bootstrap_creates_dev_project() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("keys.json");

    let ring = load_or_bootstrap(&path)?;
    assert!(!ring.is_empty());
    assert!(path.exists());

    // Second call loads the same file instead of regenerating.
    let again = load_or_bootstrap(&path)?;
    assert!(!again.is_empty());
    Ok(())
}

#[test]
fn generated_keys_are_url_safe_and_distinct() {
    let a = generate_key();
    let b = generate_key();
    assert_ne!(a, b);
    assert_eq!(a.len(), 43); // 32 bytes, base64url, no padding
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}
