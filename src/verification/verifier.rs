//! Single-container signature verification.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sigstore::registry::OciReference;
use tracing::{debug, error, info};

use super::error::VerifyError;
use super::key_resolver::KeyMaterial;
use super::orchestrator::Deadline;
use super::public_key::{KeyParseError, VerificationKey};
use super::ContainerSpec;
use crate::health::HealthState;
use crate::registry::RegistryAuthContext;

/// Error reported by a [`SignatureEngine`]
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Error from the sigstore client (registry access, payload decoding, ...)
    #[error("sigstore error: {0}")]
    Sigstore(#[from] sigstore::errors::SigstoreError),

    /// Signatures were found but none was produced by the key
    #[error("no signature satisfied the public key constraint")]
    Unsatisfied,

    /// The engine refused the image for any other reason
    #[error("{0}")]
    Rejected(String),
}

/// External signature verification engine.
///
/// `signature_repository`, when present, replaces the image's own repository as
/// the place where signatures are looked up. Transparency-log and certificate
/// checks are not part of this contract: verification is against a raw key.
#[async_trait]
pub trait SignatureEngine: Send + Sync {
    async fn verify(
        &self,
        image: &OciReference,
        key: &VerificationKey,
        auth: &RegistryAuthContext,
        signature_repository: Option<&OciReference>,
    ) -> Result<(), EngineError>;
}

/// Runs one verification attempt for one container image
#[derive(Clone)]
pub struct ContainerVerifier {
    engine: Arc<dyn SignatureEngine>,
    health: Arc<HealthState>,
}

impl ContainerVerifier {
    pub fn new(engine: Arc<dyn SignatureEngine>, health: Arc<HealthState>) -> Self {
        Self { engine, health }
    }

    /// Verify `container`'s image against `key`.
    ///
    /// On success the verified counter is incremented; nothing else is shared
    /// between calls.
    pub async fn verify(
        &self,
        container: &ContainerSpec,
        key: &KeyMaterial,
        auth: &RegistryAuthContext,
        deadline: &Deadline,
    ) -> Result<(), VerifyError> {
        let image = container.image.trim();
        debug!(container = %container.name, image = %image, "Verifying container");

        let reference = parse_image_reference(image)?;

        let verification_key =
            VerificationKey::from_pem(&key.pem).map_err(|e| match e {
                KeyParseError::Malformed(detail) => {
                    error!(image = %image, error = %detail, "Error unmarshalling public key");
                    VerifyError::PublicKeyMalformed {
                        image: image.to_string(),
                        detail,
                    }
                }
                KeyParseError::Unsupported(algorithm) => {
                    error!(image = %image, algorithm = %algorithm, "Unsupported public key type");
                    VerifyError::UnsupportedKeyAlgorithm {
                        image: image.to_string(),
                        algorithm,
                    }
                }
            })?;

        let signature_repository = container
            .signature_repository()
            .map(parse_signature_repository)
            .transpose()?;
        if let Some(repository) = &signature_repository {
            debug!(repository = %repository, "Remote signature repository overridden");
        }

        let budget = deadline.budget();
        let outcome = tokio::time::timeout(
            budget,
            self.engine.verify(
                &reference,
                &verification_key,
                auth,
                signature_repository.as_ref(),
            ),
        )
        .await;

        let detail = match outcome {
            Ok(Ok(())) => {
                self.health.metrics.record_verified();
                info!(
                    image = %image,
                    algorithm = verification_key.algorithm(),
                    "Image verified successfully"
                );
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("verification timed out after {budget:?}"),
        };

        error!(image = %image, error = %detail, "Error verifying signature");
        Err(VerifyError::SignatureVerificationFailed {
            image: image.to_string(),
            detail,
        })
    }
}

/// Parse an image reference; empty strings are rejected up front.
pub fn parse_image_reference(image: &str) -> Result<OciReference, VerifyError> {
    let invalid = || VerifyError::ImageReferenceInvalid {
        image: image.to_string(),
    };
    if image.is_empty() {
        error!("Container has no image reference");
        return Err(invalid());
    }
    OciReference::from_str(image).map_err(|e| {
        error!(image = %image, error = %e, "Error parsing image reference");
        invalid()
    })
}

/// Parse a signature repository (`registry/path`, no tag or digest).
pub fn parse_signature_repository(repository: &str) -> Result<OciReference, VerifyError> {
    let invalid = || VerifyError::SignatureRepositoryInvalid {
        repository: repository.to_string(),
    };

    // A tag lives after the last path separator; a colon before it is a registry port
    let last_segment = repository.rsplit('/').next().unwrap_or(repository);
    if repository.contains('@') || last_segment.contains(':') || repository.ends_with('/') {
        error!(repository = %repository, "Signature repository must not carry a tag or digest");
        return Err(invalid());
    }

    OciReference::from_str(repository).map_err(|e| {
        error!(repository = %repository, error = %e, "Error parsing remote signature repository");
        invalid()
    })
}
