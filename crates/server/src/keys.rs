// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API keyring: load/bootstrap the JSON keys file that maps bearer keys to
//! projects.
//!
//! File shape:
//!
//! ```json
//! {
//!   "default_policy": { "allow_localhost_without_auth": true },
//!   "projects": { "dev": { "keys": ["..."] } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// On-disk keys file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KeysFile {
    #[serde(default)]
    pub default_policy: DefaultPolicy,
    #[serde(default)]
    pub projects: HashMap<String, ProjectKeys>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DefaultPolicy {
    /// When set, loopback peers may skip bearer auth entirely.
    #[serde(default)]
    pub allow_localhost_without_auth: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProjectKeys {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// In-memory keyring resolved from the keys file.
#[derive(Debug, Default, Clone)]
pub struct Keyring {
    pub allow_loopback: bool,
    key_to_project: HashMap<String, String>,
}

impl Keyring {
    /// Resolve a bearer key to its project.
    pub fn project_for(&self, key: &str) -> Option<&str> {
        // Constant-time compare against every key; the map is small and this
        // avoids leaking which project a near-miss key was close to.
        self.key_to_project
            .iter()
            .find(|(k, _)| constant_time_eq(k, key))
            .map(|(_, project)| project.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_project.is_empty()
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Load the keys file and build the keyring. A key reused across projects is
/// a configuration error and fails the load.
pub fn load(path: &Path) -> anyhow::Result<Keyring> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read keys file {}: {e}", path.display()))?;
    let file: KeysFile = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse keys file {}: {e}", path.display()))?;

    let mut key_to_project = HashMap::new();
    for (project, entry) in &file.projects {
        for key in &entry.keys {
            if let Some(existing) = key_to_project.insert(key.clone(), project.clone()) {
                anyhow::bail!(
                    "key reused across projects {existing:?} and {project:?} in {}",
                    path.display()
                );
            }
        }
    }

    Ok(Keyring {
        allow_loopback: file.default_policy.allow_localhost_without_auth,
        key_to_project,
    })
}

/// Generate a fresh bearer key: 32 random bytes, base64url without padding.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Create a keys file for `project` with one generated key, mode 0600.
/// Refuses to overwrite an existing file. Returns the generated key.
pub fn bootstrap(path: &Path, project: &str) -> anyhow::Result<String> {
    anyhow::ensure!(!path.exists(), "keys file {} already exists", path.display());

    let key = generate_key();
    let mut projects = HashMap::new();
    projects.insert(project.to_owned(), ProjectKeys { keys: vec![key.clone()] });
    let file = KeysFile {
        default_policy: DefaultPolicy { allow_localhost_without_auth: true },
        projects,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(&file)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(key)
}

/// Load the keyring, generating a `dev` keys file first if none exists.
pub fn load_or_bootstrap(path: &Path) -> anyhow::Result<Keyring> {
    if !path.exists() {
        let key = bootstrap(path, "dev")?;
        tracing::info!(path = %path.display(), "generated keys file for project \"dev\"");
        tracing::info!("api key: {key}");
    }
    load(path)
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
