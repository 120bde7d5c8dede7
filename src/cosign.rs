//! Cosign signature verification against a raw public key.
//!
//! Signatures are stored next to the image under the tag
//! `sha256-<digest>.sig`, either in the image's own repository or in the
//! repository named by `COSIGN_REPOSITORY`.

use std::str::FromStr;

use async_trait::async_trait;
use sigstore::cosign::verification_constraint::{PublicKeyVerifier, VerificationConstraintVec};
use sigstore::cosign::{ClientBuilder, CosignCapabilities, verify_constraints};
use sigstore::errors::SigstoreVerifyConstraintsError;
use sigstore::registry::OciReference;
use tracing::debug;

use crate::registry::RegistryAuthContext;
use crate::verification::{EngineError, SignatureEngine, VerificationKey};

/// [`SignatureEngine`] backed by the sigstore cosign client
#[derive(Debug, Default, Clone, Copy)]
pub struct CosignEngine;

impl CosignEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Signature image for `digest` inside `repository`
fn relocate(repository: &OciReference, digest: &str) -> Result<OciReference, EngineError> {
    let location = format!(
        "{}/{}:{}.sig",
        repository.registry(),
        repository.repository(),
        digest.replace(':', "-")
    );
    OciReference::from_str(&location).map_err(|e| {
        EngineError::Rejected(format!("cannot build signature reference {location:?}: {e}"))
    })
}

#[async_trait]
impl SignatureEngine for CosignEngine {
    async fn verify(
        &self,
        image: &OciReference,
        key: &VerificationKey,
        auth: &RegistryAuthContext,
        signature_repository: Option<&OciReference>,
    ) -> Result<(), EngineError> {
        let mut client = ClientBuilder::default().build()?;

        debug!(
            image = %image,
            authenticated = auth.has_credentials_for(image.registry()),
            "Resolving signature image"
        );
        let image_auth = auth.for_registry(image.registry());
        let (cosign_image, digest) = client.triangulate(image, &image_auth).await?;

        let (cosign_image, signature_auth) = match signature_repository {
            Some(repository) => (
                relocate(repository, &digest)?,
                auth.for_registry(repository.registry()),
            ),
            None => (cosign_image, image_auth),
        };
        debug!(image = %image, signatures = %cosign_image, digest = %digest, "Fetching signatures");

        let layers = client
            .trusted_signature_layers(&signature_auth, &digest, &cosign_image)
            .await?;
        if layers.is_empty() {
            return Err(EngineError::Rejected(format!(
                "no signatures found in {cosign_image}"
            )));
        }

        let verifier = PublicKeyVerifier::new(key.pem().as_bytes(), &key.signing_scheme())?;
        let constraints: VerificationConstraintVec = vec![Box::new(verifier)];

        match verify_constraints(&layers, constraints.iter()) {
            Ok(()) => Ok(()),
            Err(SigstoreVerifyConstraintsError {
                unsatisfied_constraints,
            }) => {
                debug!(
                    image = %image,
                    unsatisfied = unsatisfied_constraints.len(),
                    "Signature constraints not satisfied"
                );
                Err(EngineError::Unsatisfied)
            }
        }
    }
}
