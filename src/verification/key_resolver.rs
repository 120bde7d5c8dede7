//! Public key resolution for a single container.
//!
//! Resolution order, first match wins:
//! 1. literal `COSIGNPUBKEY` value on the container
//! 2. `COSIGNPUBKEY` sourced from a Secret key reference
//! 3. the namespace-wide default secret (`cosignwebhook`, key `COSIGNPUBKEY`)
//!
//! Nothing here produces a deny. Missing keys become [`KeyLookup::NotFound`] and
//! store failures become [`KeyLookup::LookupError`]; the orchestrator decides what
//! a lookup error means.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::LookupError;
use super::orchestrator::Deadline;
use super::{COSIGN_KEY_ENV, ContainerSpec, EnvValue};

/// Read access to Secret values.
///
/// `Ok(None)` means the secret or the key does not exist, or the stored value is
/// empty. `Err` is reserved for lookups that could not complete.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        secret: &str,
        key: &str,
    ) -> Result<Option<String>, LookupError>;
}

/// Where a resolved key came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Literal,
    Secret { name: String, key: String },
    DefaultSecret { name: String },
}

/// Resolved key material, not yet parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub source: KeySource,
    pub pem: String,
}

/// Outcome of resolving the key for one container
#[derive(Debug)]
pub enum KeyLookup {
    Found(KeyMaterial),
    /// No key configured anywhere; not an error
    NotFound,
    /// A key source exists but could not be read
    LookupError(LookupError),
}

/// Finds the public key configured for a container
#[derive(Clone)]
pub struct PublicKeyResolver {
    secrets: Arc<dyn SecretStore>,
    default_secret: String,
}

impl PublicKeyResolver {
    pub fn new(secrets: Arc<dyn SecretStore>, default_secret: &str) -> Self {
        Self {
            secrets,
            default_secret: default_secret.to_string(),
        }
    }

    /// Resolve the key for `container` in `namespace`.
    ///
    /// Every store call is bounded by `deadline`; a timeout is a lookup error.
    pub async fn resolve(
        &self,
        container: &ContainerSpec,
        namespace: &str,
        deadline: &Deadline,
    ) -> KeyLookup {
        let configured = container
            .env_values(COSIGN_KEY_ENV)
            .find(|value| !matches!(value, EnvValue::Other));

        match configured {
            Some(EnvValue::Literal(pem)) => {
                debug!(container = %container.name, "Found public key in env var");
                return KeyLookup::Found(KeyMaterial {
                    source: KeySource::Literal,
                    pem: pem.clone(),
                });
            }
            Some(EnvValue::SecretKeyRef { name, key }) => {
                debug!(
                    container = %container.name,
                    secret = %name,
                    "Found reference to public key in secret"
                );
                match self.fetch(namespace, name, key, deadline).await {
                    Ok(Some(pem)) => {
                        return KeyLookup::Found(KeyMaterial {
                            source: KeySource::Secret {
                                name: name.clone(),
                                key: key.clone(),
                            },
                            pem,
                        });
                    }
                    Ok(None) => {
                        debug!(
                            container = %container.name,
                            secret = %name,
                            key = %key,
                            "Referenced secret or key not found"
                        );
                    }
                    Err(e) => {
                        warn!(
                            container = %container.name,
                            namespace = %namespace,
                            secret = %name,
                            error = %e,
                            "Could not read referenced public key secret"
                        );
                        return KeyLookup::LookupError(e);
                    }
                }
            }
            _ => {}
        }

        match self
            .fetch(namespace, &self.default_secret, COSIGN_KEY_ENV, deadline)
            .await
        {
            Ok(Some(pem)) => {
                debug!(
                    container = %container.name,
                    secret = %self.default_secret,
                    "Using public key from default secret"
                );
                KeyLookup::Found(KeyMaterial {
                    source: KeySource::DefaultSecret {
                        name: self.default_secret.clone(),
                    },
                    pem,
                })
            }
            Ok(None) => {
                debug!(container = %container.name, "No public key found");
                KeyLookup::NotFound
            }
            Err(e) => {
                warn!(
                    container = %container.name,
                    namespace = %namespace,
                    secret = %self.default_secret,
                    error = %e,
                    "Could not read default public key secret"
                );
                KeyLookup::LookupError(e)
            }
        }
    }

    async fn fetch(
        &self,
        namespace: &str,
        secret: &str,
        key: &str,
        deadline: &Deadline,
    ) -> Result<Option<String>, LookupError> {
        let budget = deadline.budget();
        match tokio::time::timeout(budget, self.secrets.get(namespace, secret, key)).await {
            Ok(result) => Ok(result?.filter(|value| !value.trim().is_empty())),
            Err(_) => Err(LookupError::Timeout(budget)),
        }
    }
}
