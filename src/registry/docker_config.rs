//! Docker config parsing for image pull secrets.
//!
//! Two secret layouts exist:
//! - `kubernetes.io/dockerconfigjson`: key `.dockerconfigjson`, `{"auths": {host: entry}}`
//! - `kubernetes.io/dockercfg` (legacy): key `.dockercfg`, `{host: entry}`
//!
//! An entry carries either `username`/`password` or a base64 `auth` of
//! `username:password`.

use std::collections::HashMap;

use base64::Engine;
use serde::Deserialize;

use super::Credential;

/// Secret key of a `kubernetes.io/dockerconfigjson` secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
/// Secret key of a legacy `kubernetes.io/dockercfg` secret
pub const DOCKER_CFG_KEY: &str = ".dockercfg";

const DOCKER_HUB: &str = "index.docker.io";

#[derive(Deserialize, Default)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthConfig>,
}

#[derive(Deserialize, Default)]
struct DockerAuthConfig {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl DockerAuthConfig {
    fn credential(&self) -> Result<Option<Credential>, String> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            if !username.is_empty() {
                return Ok(Some(Credential {
                    username: username.clone(),
                    password: password.clone(),
                }));
            }
        }

        let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth)
            .map_err(|e| format!("auth field is not base64: {e}"))?;
        let decoded = String::from_utf8(decoded).map_err(|_| "auth field is not UTF-8".to_string())?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| "auth field is not username:password".to_string())?;

        Ok(Some(Credential {
            username: username.to_string(),
            password: password.to_string(),
        }))
    }
}

/// Parse a docker config document into `(registry, credential)` pairs.
///
/// `legacy` selects the `.dockercfg` layout. Entries without usable credentials
/// are skipped. Pairs are sorted by registry so that insertion order is stable.
pub fn parse_docker_config(data: &[u8], legacy: bool) -> Result<Vec<(String, Credential)>, String> {
    let auths: HashMap<String, DockerAuthConfig> = if legacy {
        serde_json::from_slice(data).map_err(|e| e.to_string())?
    } else {
        let file: DockerConfigFile = serde_json::from_slice(data).map_err(|e| e.to_string())?;
        file.auths
    };

    let mut pairs = Vec::with_capacity(auths.len());
    for (registry, entry) in auths {
        if let Some(credential) = entry.credential()? {
            pairs.push((registry, credential));
        }
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}

/// Normalize a registry key or host so config entries match image registries.
///
/// Strips scheme, path and trailing slashes, lowercases, and folds Docker Hub
/// aliases onto one host.
pub fn normalize_registry(registry: &str) -> String {
    let trimmed = registry.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match host.as_str() {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DOCKER_HUB.to_string()
        }
        _ => host,
    }
}
