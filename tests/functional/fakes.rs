//! In-memory collaborators for functional tests.
//!
//! Each fake records the calls it receives so tests can assert on traversal
//! order and on what was never touched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use sigstore::registry::OciReference;

use cosign_webhook::HealthState;
use cosign_webhook::cluster::{EventError, EventSink};
use cosign_webhook::registry::{CredentialError, CredentialProvider, RegistryAuthContext};
use cosign_webhook::verification::{
    COSIGN_KEY_ENV, ContainerSpec, EnvEntry, EngineError, LookupError, Notification,
    PodVerifier, SecretStore, SignatureEngine, VerificationKey, VerificationSettings,
};

pub const ECDSA_KEY: &str = include_str!("../../testdata/cosign_ecdsa.pub");
pub const RSA_KEY: &str = include_str!("../../testdata/cosign_rsa.pub");

/// Secret values keyed by (namespace, secret, key)
#[derive(Default)]
pub struct MemorySecretStore {
    values: HashMap<(String, String, String), String>,
    failing: HashSet<String>,
    stalling: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl MemorySecretStore {
    pub fn with(mut self, namespace: &str, secret: &str, key: &str, value: &str) -> Self {
        self.values.insert(
            (namespace.to_string(), secret.to_string(), key.to_string()),
            value.to_string(),
        );
        self
    }

    /// Every lookup of `secret` fails with an API error
    pub fn failing(mut self, secret: &str) -> Self {
        self.failing.insert(secret.to_string());
        self
    }

    /// Every lookup of `secret` hangs until cancelled
    pub fn stalling(mut self, secret: &str) -> Self {
        self.stalling.insert(secret.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(
        &self,
        namespace: &str,
        secret: &str,
        key: &str,
    ) -> Result<Option<String>, LookupError> {
        self.calls.lock().unwrap().push(secret.to_string());
        if self.stalling.contains(secret) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(secret) {
            return Err(LookupError::Unavailable(format!(
                "secrets \"{secret}\" is forbidden"
            )));
        }
        Ok(self
            .values
            .get(&(namespace.to_string(), secret.to_string(), key.to_string()))
            .cloned())
    }
}

/// Keychain that returns an anonymous context or a fixed error
#[derive(Default)]
pub struct StaticCredentials {
    fail: bool,
    pub calls: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl StaticCredentials {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn build(
        &self,
        namespace: &str,
        service_account: &str,
        pull_secrets: &[String],
    ) -> Result<RegistryAuthContext, CredentialError> {
        self.calls.lock().unwrap().push((
            namespace.to_string(),
            service_account.to_string(),
            pull_secrets.to_vec(),
        ));
        if self.fail {
            return Err(CredentialError::KeychainInitFailed(
                "serviceaccounts \"default\" is forbidden".to_string(),
            ));
        }
        Ok(RegistryAuthContext::anonymous())
    }
}

/// Signature engine that accepts everything except the listed repositories
#[derive(Default)]
pub struct RecordingEngine {
    rejected: HashSet<String>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingEngine {
    /// Reject images whose repository path is `repository`
    pub fn rejecting(mut self, repository: &str) -> Self {
        self.rejected.insert(repository.to_string());
        self
    }

    /// Sleep before answering
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Repository paths in the order they were verified
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignatureEngine for RecordingEngine {
    async fn verify(
        &self,
        image: &OciReference,
        _key: &VerificationKey,
        _auth: &RegistryAuthContext,
        _signature_repository: Option<&OciReference>,
    ) -> Result<(), EngineError> {
        let repository = image.repository().to_string();
        self.calls.lock().unwrap().push(repository.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.contains(&repository) {
            return Err(EngineError::Unsatisfied);
        }
        Ok(())
    }
}

/// Event sink keeping every published event
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(ObjectReference, Notification)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(ObjectReference, Notification)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(
        &self,
        subject: &ObjectReference,
        notification: Notification,
    ) -> Result<(), EventError> {
        self.events
            .lock()
            .unwrap()
            .push((subject.clone(), notification));
        Ok(())
    }
}

/// Collaborators wired into a [`PodVerifier`]
pub struct Harness {
    pub secrets: Arc<MemorySecretStore>,
    pub credentials: Arc<StaticCredentials>,
    pub engine: Arc<RecordingEngine>,
    pub health: Arc<HealthState>,
    pub verifier: PodVerifier,
}

impl Harness {
    pub fn new(secrets: MemorySecretStore, engine: RecordingEngine) -> Self {
        Self::with(
            secrets,
            StaticCredentials::default(),
            engine,
            VerificationSettings::default(),
        )
    }

    pub fn with(
        secrets: MemorySecretStore,
        credentials: StaticCredentials,
        engine: RecordingEngine,
        settings: VerificationSettings,
    ) -> Self {
        let secrets = Arc::new(secrets);
        let credentials = Arc::new(credentials);
        let engine = Arc::new(engine);
        let health = Arc::new(HealthState::new());
        let verifier = PodVerifier::new(
            secrets.clone(),
            credentials.clone(),
            engine.clone(),
            health.clone(),
            settings,
        );
        Self {
            secrets,
            credentials,
            engine,
            health,
            verifier,
        }
    }
}

/// Container `name` running `registry.example.com/<name>:1.0`
pub fn container(name: &str) -> ContainerSpec {
    ContainerSpec::new(name, &format!("registry.example.com/{name}:1.0"))
}

/// Same as [`container`] with a literal public key
pub fn signed_container(name: &str) -> ContainerSpec {
    container(name).with_env(EnvEntry::literal(COSIGN_KEY_ENV, ECDSA_KEY))
}
