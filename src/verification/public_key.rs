//! Public key parsing and verifier-strategy selection.
//!
//! Cosign keys are PEM-encoded SubjectPublicKeyInfo documents. Only two
//! algorithms are accepted, so the strategy is a closed enum rather than a trait
//! object: ECDSA P-256 with SHA-256, and RSA PKCS#1 v1.5 with SHA-256.

use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use sigstore::crypto::SigningScheme;
use x509_cert::der::{Decode, pem};
use x509_cert::spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};

const PEM_PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

/// id-ecPublicKey (RFC 5480)
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// secp256r1 / prime256v1
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
/// rsaEncryption (RFC 8017)
const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
/// id-Ed25519 (RFC 8410)
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Why a key string could not become a [`VerificationKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// Not PEM, wrong label, bad base64 or bad DER
    Malformed(String),
    /// Well-formed key of an algorithm we cannot verify with
    Unsupported(String),
}

/// A parsed public key, tagged with the verifier it selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationKey {
    /// ECDSA over P-256, SHA-256 digests
    Ecdsa { pem: String },
    /// RSA PKCS#1 v1.5, SHA-256 digests
    Rsa { pem: String, modulus_bits: usize },
}

impl VerificationKey {
    /// Parse PEM key material and select the verification strategy
    pub fn from_pem(pem: &str) -> Result<Self, KeyParseError> {
        let armored = armored_block(pem)?;
        let der = pem_to_der(&armored)?;
        let spki = SubjectPublicKeyInfoRef::from_der(&der)
            .map_err(|e| KeyParseError::Malformed(format!("invalid SubjectPublicKeyInfo: {e}")))?;

        let algorithm = spki.algorithm.oid;

        if algorithm == OID_EC_PUBLIC_KEY {
            let curve = spki.algorithm.parameters_oid().map_err(|e| {
                KeyParseError::Malformed(format!("EC key without named curve: {e}"))
            })?;
            if curve != OID_P256 {
                return Err(KeyParseError::Unsupported(format!("ECDSA curve {curve}")));
            }
            return Ok(VerificationKey::Ecdsa { pem: armored });
        }

        if algorithm == OID_RSA_ENCRYPTION {
            let key = RsaPublicKey::from_public_key_der(&der)
                .map_err(|e| KeyParseError::Malformed(format!("invalid RSA key: {e}")))?;
            return Ok(VerificationKey::Rsa {
                pem: armored,
                modulus_bits: key.size() * 8,
            });
        }

        if algorithm == OID_ED25519 {
            return Err(KeyParseError::Unsupported("Ed25519".to_string()));
        }
        Err(KeyParseError::Unsupported(format!("algorithm {algorithm}")))
    }

    /// PEM text the key was parsed from
    pub fn pem(&self) -> &str {
        match self {
            VerificationKey::Ecdsa { pem } | VerificationKey::Rsa { pem, .. } => pem,
        }
    }

    /// Short algorithm name for logs
    pub fn algorithm(&self) -> &'static str {
        match self {
            VerificationKey::Ecdsa { .. } => "ecdsa-p256-sha256",
            VerificationKey::Rsa { .. } => "rsa-pkcs1v15-sha256",
        }
    }

    /// Signing scheme handed to the cosign verifier
    pub fn signing_scheme(&self) -> SigningScheme {
        match self {
            VerificationKey::Ecdsa { .. } => SigningScheme::ECDSA_P256_SHA256_ASN1,
            VerificationKey::Rsa { modulus_bits, .. } => {
                SigningScheme::RSA_PKCS1_SHA256(*modulus_bits)
            }
        }
    }
}

/// Cut the first PEM block out of `pem`.
///
/// Text before the BEGIN boundary and after the END boundary is ignored, and
/// indentation inside the block is stripped.
fn armored_block(pem: &str) -> Result<String, KeyParseError> {
    let (_, rest) = pem
        .split_once("-----BEGIN ")
        .ok_or_else(|| KeyParseError::Malformed("missing PEM header".to_string()))?;
    let (body, after) = rest
        .split_once("-----END ")
        .ok_or_else(|| KeyParseError::Malformed("missing PEM footer".to_string()))?;
    let footer = after.lines().next().unwrap_or_default();

    Ok(format!("-----BEGIN {body}-----END {footer}")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Decode a `PUBLIC KEY` PEM block into DER.
fn pem_to_der(armored: &str) -> Result<Vec<u8>, KeyParseError> {
    let input = format!("{armored}\n");
    let (label, der) = pem::decode_vec(input.as_bytes())
        .map_err(|e| KeyParseError::Malformed(format!("invalid PEM: {e}")))?;
    if label != PEM_PUBLIC_KEY_LABEL {
        return Err(KeyParseError::Malformed(format!(
            "expected \"{PEM_PUBLIC_KEY_LABEL}\" PEM block, found {label:?}"
        )));
    }
    Ok(der)
}
