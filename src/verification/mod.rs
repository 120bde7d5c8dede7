//! Per-Pod signature verification.
//!
//! The pieces are layered leaves-first:
//! - [`key_resolver`] finds the public key configured for a container
//! - [`public_key`] parses that key into a closed set of verifier strategies
//! - [`verifier`] runs one signature check for one container image
//! - [`orchestrator`] walks every container of a Pod and derives the decision

pub mod error;
pub mod key_resolver;
pub mod orchestrator;
pub mod public_key;
pub mod verifier;

use std::fmt;

use k8s_openapi::api::core::v1::{Container, Pod};

pub use error::{LookupError, VerifyError};
pub use key_resolver::{KeyLookup, KeyMaterial, KeySource, PublicKeyResolver, SecretStore};
pub use orchestrator::{
    ALLOW_MESSAGE, ContainerState, Deadline, EvaluationError, LookupErrorPolicy, PodVerifier, Verdict,
    VerificationSettings,
};
pub use public_key::VerificationKey;
pub use verifier::{ContainerVerifier, EngineError, SignatureEngine};

/// Environment variable carrying the public key (literal or secretKeyRef)
pub const COSIGN_KEY_ENV: &str = "COSIGNPUBKEY";
/// Environment variable carrying an alternate signature repository
pub const COSIGN_REPOSITORY_ENV: &str = "COSIGN_REPOSITORY";
/// Namespace-wide fallback secret holding the public key under [`COSIGN_KEY_ENV`]
pub const DEFAULT_KEY_SECRET: &str = "cosignwebhook";
/// Service account used when the Pod does not name one
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Value of a single environment entry, as far as key resolution cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Non-empty literal value
    Literal(String),
    /// Reference to a key inside a Secret in the Pod's namespace
    SecretKeyRef { name: String, key: String },
    /// Empty literal or a source other than a Secret (ConfigMap, fieldRef, ...)
    Other,
}

/// One environment entry of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub name: String,
    pub value: EnvValue,
}

impl EnvEntry {
    pub fn literal(name: &str, value: &str) -> Self {
        let value = if value.is_empty() {
            EnvValue::Other
        } else {
            EnvValue::Literal(value.to_string())
        };
        Self {
            name: name.to_string(),
            value,
        }
    }

    pub fn secret_ref(name: &str, secret: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            value: EnvValue::SecretKeyRef {
                name: secret.to_string(),
                key: key.to_string(),
            },
        }
    }
}

/// The parts of a container the verifier needs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub name: String,
    /// Image reference as written in the Pod; may be empty or malformed
    pub image: String,
    pub env: Vec<EnvEntry>,
}

impl ContainerSpec {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            env: Vec::new(),
        }
    }

    /// Builder helper appending an environment entry
    pub fn with_env(mut self, entry: EnvEntry) -> Self {
        self.env.push(entry);
        self
    }

    /// Convert a Kubernetes container, keeping only what verification reads.
    ///
    /// A non-empty literal `value` takes precedence over `valueFrom`, which matches
    /// how the kubelet resolves the variable.
    pub fn from_container(container: &Container) -> Self {
        let env = container
            .env
            .iter()
            .flatten()
            .map(|var| {
                let value = match (&var.value, &var.value_from) {
                    (Some(v), _) if !v.is_empty() => EnvValue::Literal(v.clone()),
                    (_, Some(source)) => match &source.secret_key_ref {
                        Some(selector) => EnvValue::SecretKeyRef {
                            name: selector.name.clone(),
                            key: selector.key.clone(),
                        },
                        None => EnvValue::Other,
                    },
                    _ => EnvValue::Other,
                };
                EnvEntry {
                    name: var.name.clone(),
                    value,
                }
            })
            .collect();

        Self {
            name: container.name.clone(),
            image: container.image.clone().unwrap_or_default(),
            env,
        }
    }

    /// All values declared for the named environment variable, in declaration order
    pub fn env_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EnvValue> + 'a {
        self.env
            .iter()
            .filter(move |entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    /// Alternate location where this image's signatures are published, if set
    pub fn signature_repository(&self) -> Option<&str> {
        self.env_values(COSIGN_REPOSITORY_ENV)
            .find_map(|value| match value {
                EnvValue::Literal(v) => Some(v.trim()),
                _ => None,
            })
            .filter(|v| !v.is_empty())
    }
}

/// Which list of the Pod spec a container came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Init,
    Regular,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Init => write!(f, "init container"),
            ContainerKind::Regular => write!(f, "container"),
        }
    }
}

/// Everything needed to verify one Pod admission.
///
/// Built once per inbound review and never mutated during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodVerificationRequest {
    /// Correlation id of the admission review
    pub uid: String,
    pub namespace: String,
    /// Pod name, or its generateName prefix when the name is not assigned yet
    pub pod_name: String,
    pub service_account: String,
    pub pull_secrets: Vec<String>,
    init_containers: Vec<ContainerSpec>,
    containers: Vec<ContainerSpec>,
}

impl PodVerificationRequest {
    pub fn new(uid: &str, namespace: &str) -> Self {
        Self {
            uid: uid.to_string(),
            namespace: namespace.to_string(),
            pod_name: String::new(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            pull_secrets: Vec::new(),
            init_containers: Vec::new(),
            containers: Vec::new(),
        }
    }

    pub fn with_pod_name(mut self, name: &str) -> Self {
        self.pod_name = name.to_string();
        self
    }

    pub fn with_service_account(mut self, service_account: &str) -> Self {
        self.service_account = service_account.to_string();
        self
    }

    pub fn with_pull_secret(mut self, name: &str) -> Self {
        self.pull_secrets.push(name.to_string());
        self
    }

    pub fn with_init_container(mut self, container: ContainerSpec) -> Self {
        self.init_containers.push(container);
        self
    }

    pub fn with_container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    /// Build the request from a decoded Pod.
    ///
    /// `request_namespace` is the namespace of the admission request, used when the
    /// Pod metadata does not carry one yet.
    pub fn from_pod(uid: &str, pod: &Pod, request_namespace: Option<&str>) -> Self {
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .or(request_namespace)
            .unwrap_or("default");
        let pod_name = pod
            .metadata
            .name
            .as_deref()
            .or(pod.metadata.generate_name.as_deref())
            .unwrap_or_default();

        let mut request = Self::new(uid, namespace).with_pod_name(pod_name);

        if let Some(spec) = &pod.spec {
            if let Some(sa) = spec
                .service_account_name
                .as_deref()
                .filter(|sa| !sa.is_empty())
            {
                request.service_account = sa.to_string();
            }
            request.pull_secrets = spec
                .image_pull_secrets
                .iter()
                .flatten()
                .map(|s| s.name.clone())
                .filter(|name| !name.is_empty())
                .collect();
            request.init_containers = spec
                .init_containers
                .iter()
                .flatten()
                .map(ContainerSpec::from_container)
                .collect();
            request.containers = spec
                .containers
                .iter()
                .map(ContainerSpec::from_container)
                .collect();
        }

        request
    }

    /// The single evaluation sequence: init containers, then regular containers,
    /// each group in declaration order.
    pub fn containers(&self) -> impl Iterator<Item = (ContainerKind, &ContainerSpec)> {
        self.init_containers
            .iter()
            .map(|c| (ContainerKind::Init, c))
            .chain(self.containers.iter().map(|c| (ContainerKind::Regular, c)))
    }

    pub fn container_count(&self) -> usize {
        self.init_containers.len() + self.containers.len()
    }
}

/// Result of evaluating a single container
#[derive(Debug)]
pub enum VerificationOutcome {
    /// No key could be resolved; the container does not count as verified
    Skipped,
    Verified,
    Failed(VerifyError),
}

/// The single admission decision for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow {
        uid: String,
        message: String,
    },
    Deny {
        uid: String,
        /// Classified failure tag, e.g. `PublicKeyMalformed`
        reason: String,
        message: String,
    },
}

impl AdmissionDecision {
    pub fn uid(&self) -> &str {
        match self {
            AdmissionDecision::Allow { uid, .. } | AdmissionDecision::Deny { uid, .. } => uid,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AdmissionDecision::Allow { message, .. } | AdmissionDecision::Deny { message, .. } => {
                message
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allow { .. })
    }
}

/// Best-effort notification emitted after an `Allow`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// At least one container image was verified
    PodVerified,
    /// Every container was skipped
    NoVerification,
}

impl Notification {
    /// Event reason tag
    pub fn reason(&self) -> &'static str {
        match self {
            Notification::PodVerified => "PodVerified",
            Notification::NoVerification => "NoVerification",
        }
    }

    /// Human-readable event note
    pub fn message(&self) -> &'static str {
        match self {
            Notification::PodVerified => "Signature of pod's image(s) verified successfully",
            Notification::NoVerification => "No signature verification performed",
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}
