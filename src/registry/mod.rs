//! Registry credentials for signature lookups.
//!
//! A [`RegistryAuthContext`] is built once per admission request from the Pod's
//! image pull secrets and those of its service account, then shared read-only by
//! every container verification of that request.

pub mod docker_config;
pub mod keychain;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sigstore::registry::Auth;
use thiserror::Error;

pub use docker_config::normalize_registry;
pub use keychain::KubeKeychain;

/// Failure to build registry credentials; fatal to the admission request
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Kubernetes API error while reading the service account or a pull secret
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A pull secret holds a docker config that cannot be parsed
    #[error("invalid docker config in secret {secret:?}: {detail}")]
    InvalidDockerConfig { secret: String, detail: String },

    /// Keychain could not be initialized for another reason
    #[error("keychain initialization failed: {0}")]
    KeychainInitFailed(String),

    #[error("keychain initialization timed out after {0:?}")]
    Timeout(Duration),
}

/// Builds the registry credentials for one Pod
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn build(
        &self,
        namespace: &str,
        service_account: &str,
        pull_secrets: &[String],
    ) -> Result<RegistryAuthContext, CredentialError>;
}

/// Username/password pair for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials keyed by normalized registry host
#[derive(Debug, Default, Clone)]
pub struct RegistryAuthContext {
    credentials: HashMap<String, Credential>,
}

impl RegistryAuthContext {
    /// Context without credentials; every registry is accessed anonymously
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Add a credential unless the registry already has one.
    ///
    /// Returns `true` when the credential was stored.
    pub fn insert(&mut self, registry: &str, credential: Credential) -> bool {
        let host = normalize_registry(registry);
        if host.is_empty() || self.credentials.contains_key(&host) {
            return false;
        }
        self.credentials.insert(host, credential);
        true
    }

    /// Auth to use against `registry`
    pub fn for_registry(&self, registry: &str) -> Auth {
        match self.credentials.get(&normalize_registry(registry)) {
            Some(c) => Auth::Basic(c.username.clone(), c.password.clone()),
            None => Auth::Anonymous,
        }
    }

    pub fn has_credentials_for(&self, registry: &str) -> bool {
        self.credentials
            .contains_key(&normalize_registry(registry))
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
