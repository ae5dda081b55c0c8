//! Registry credentials sourced from a docker `config.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{DrydockError, Result};

/// One stored credential: the registry host and the base64 `user:pass` blob,
/// passed through verbatim as a Basic Authorization value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuthEntry {
    pub host: String,
    pub encoded_auth: String,
}

#[derive(Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthBlock>,
}

#[derive(Deserialize)]
struct AuthBlock {
    auth: Option<String>,
}

/// The conventional `~/.docker/config.json` location, if a home dir exists.
pub fn default_docker_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".docker/config.json"))
}

/// Loads the `auths` section of a docker config file. Entries without an
/// `auth` value (credential-helper managed) are skipped with a log line.
pub fn load_authentications(path: &Path) -> Result<Vec<RegistryAuthEntry>> {
    let raw = std::fs::read_to_string(path)?;
    let config: DockerConfigFile = serde_json::from_str(&raw).map_err(|e| {
        DrydockError::Config(format!("invalid docker config {}: {}", path.display(), e))
    })?;

    let mut entries = Vec::new();
    for (key, block) in config.auths {
        match block.auth {
            Some(encoded_auth) => entries.push(RegistryAuthEntry {
                host: host_of_auth_key(&key),
                encoded_auth,
            }),
            None => {
                tracing::debug!(registry = %key, "Skipping auth entry without inline credentials");
            }
        }
    }

    // Deterministic lookup order regardless of map iteration
    entries.sort_by(|a, b| a.host.cmp(&b.host));
    Ok(entries)
}

/// Reduces an `auths` key (`https://index.docker.io/v1/`, `ghcr.io`, ...)
/// to its `host[:port]` part.
fn host_of_auth_key(key: &str) -> String {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);

    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

/// Finds the stored credential for a `host[:port]`, tolerating entries that
/// were written without the port.
pub fn auth_for_host<'a>(entries: &'a [RegistryAuthEntry], host: &str) -> Option<&'a str> {
    let bare_host = host.split(':').next().unwrap_or(host);
    entries
        .iter()
        .find(|e| e.host == host || e.host == bare_host)
        .map(|e| e.encoded_auth.as_str())
}
