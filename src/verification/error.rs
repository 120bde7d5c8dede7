//! Error types for key resolution and container verification.

use std::time::Duration;

use thiserror::Error;

/// Why a container failed verification.
///
/// Every variant is fatal to the admission request (the Pod is denied) but never
/// to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Image reference is empty or cannot be parsed
    #[error("could not parse image reference for image {image:?}")]
    ImageReferenceInvalid { image: String },

    /// Key material is not a PEM-encoded public key
    #[error("public key for image {image:?} malformed: {detail}")]
    PublicKeyMalformed { image: String, detail: String },

    /// Key parsed but its algorithm has no verifier
    #[error("unsupported public key type for image {image:?}: {algorithm}")]
    UnsupportedKeyAlgorithm { image: String, algorithm: String },

    /// `COSIGN_REPOSITORY` is not a valid repository
    #[error("could not parse signature repository {repository:?}")]
    SignatureRepositoryInvalid { repository: String },

    /// The signature engine rejected or could not check the image
    #[error("signature for {image:?} couldn't be verified: {detail}")]
    SignatureVerificationFailed { image: String, detail: String },

    /// Key lookup failed and the lookup-error policy is fail-closed
    #[error("public key lookup failed: {detail}")]
    KeyLookupFailed { detail: String },
}

impl VerifyError {
    /// Stable tag used in deny messages and metric labels
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::ImageReferenceInvalid { .. } => "ImageReferenceInvalid",
            VerifyError::PublicKeyMalformed { .. } => "PublicKeyMalformed",
            VerifyError::UnsupportedKeyAlgorithm { .. } => "UnsupportedKeyAlgorithm",
            VerifyError::SignatureRepositoryInvalid { .. } => "SignatureRepositoryInvalid",
            VerifyError::SignatureVerificationFailed { .. } => "SignatureVerificationFailed",
            VerifyError::KeyLookupFailed { .. } => "KeyLookupFailed",
        }
    }
}

/// A key lookup that could not complete.
///
/// Distinct from "no key configured": under the default policy both skip the
/// container, but this one is logged and counted.
#[derive(Error, Debug)]
pub enum LookupError {
    /// Kubernetes API error other than not-found
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Secret value is not valid UTF-8
    #[error("secret {secret:?} key {key:?} is not valid UTF-8")]
    InvalidValue { secret: String, key: String },

    /// Store could not be reached
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// Lookup exceeded its time budget
    #[error("secret lookup timed out after {0:?}")]
    Timeout(Duration),
}
