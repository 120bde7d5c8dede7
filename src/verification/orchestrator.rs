//! Per-Pod verification state machine.
//!
//! Each container moves through
//!
//! ```text
//! Pending -> NoKey                      (skipped)
//! Pending -> KeyFound -> Verified
//! Pending -> KeyFound -> Failed         (terminal for the whole Pod)
//! ```
//!
//! Containers are visited in one concatenated sequence: init containers, then
//! regular containers, each in declaration order. The first `Failed` container
//! ends the walk and denies the Pod; later containers are never resolved.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{LookupError, VerifyError};
use super::key_resolver::{KeyLookup, KeyMaterial, PublicKeyResolver, SecretStore};
use super::verifier::{ContainerVerifier, SignatureEngine};
use super::{
    AdmissionDecision, ContainerKind, ContainerSpec, DEFAULT_KEY_SECRET, Notification,
    PodVerificationRequest, VerificationOutcome,
};
use crate::health::HealthState;
use crate::registry::{CredentialError, CredentialProvider, RegistryAuthContext};

/// Message carried by every `Allow` decision
pub const ALLOW_MESSAGE: &str = "Cosign verification passed";

/// What a key lookup error means for the container.
///
/// A lookup error is a key source that exists but could not be read (RBAC
/// denial, API outage, timeout). It is kept distinct from "no key configured" so
/// that the choice is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LookupErrorPolicy {
    /// Skip the container, exactly as if no key were configured
    #[default]
    FailOpen,
    /// Deny the Pod with reason `KeyLookupFailed`
    FailClosed,
}

impl fmt::Display for LookupErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupErrorPolicy::FailOpen => write!(f, "fail-open"),
            LookupErrorPolicy::FailClosed => write!(f, "fail-closed"),
        }
    }
}

/// Runtime settings for the orchestrator
#[derive(Debug, Clone)]
pub struct VerificationSettings {
    /// Upper bound for any single secret fetch, credential build or verification
    pub call_timeout: Duration,
    /// Request-scoped deadline covering the whole evaluation
    pub request_deadline: Duration,
    pub lookup_error_policy: LookupErrorPolicy,
    /// Name of the namespace-wide fallback key secret
    pub default_key_secret: String,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            request_deadline: Duration::from_secs(25),
            lookup_error_policy: LookupErrorPolicy::FailOpen,
            default_key_secret: DEFAULT_KEY_SECRET.to_string(),
        }
    }
}

/// Time budget for one admission request.
///
/// Every downstream call gets the smaller of the per-call timeout and whatever is
/// left of the request deadline.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    call_timeout: Duration,
}

impl Deadline {
    pub fn new(call_timeout: Duration, request_deadline: Duration) -> Self {
        Self {
            expires_at: Instant::now() + request_deadline,
            call_timeout,
        }
    }

    /// Time left until the request deadline
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Timeout to apply to the next downstream call
    pub fn budget(&self) -> Duration {
        self.call_timeout.min(self.remaining())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Per-container state
#[derive(Debug)]
pub enum ContainerState {
    Pending,
    NoKey,
    KeyFound(KeyMaterial),
    Verified,
    Failed(VerifyError),
}

impl ContainerState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerState::NoKey | ContainerState::Verified | ContainerState::Failed(_)
        )
    }

    fn into_outcome(self) -> VerificationOutcome {
        match self {
            ContainerState::Verified => VerificationOutcome::Verified,
            ContainerState::Failed(e) => VerificationOutcome::Failed(e),
            _ => VerificationOutcome::Skipped,
        }
    }
}

/// The request could not be evaluated at all; distinct from a policy deny
#[derive(thiserror::Error, Debug)]
pub enum EvaluationError {
    #[error("failed initializing registry keychain: {0}")]
    Credentials(#[from] CredentialError),

    #[error("request deadline exceeded after evaluating {evaluated} of {total} containers")]
    DeadlineExceeded { evaluated: usize, total: usize },
}

/// Result of evaluating one Pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: AdmissionDecision,
    /// Set only for `Allow`; a deny produces no notification
    pub notification: Option<Notification>,
    /// Containers that reached `Verified`
    pub verified: usize,
    /// Containers that reached `NoKey`
    pub skipped: usize,
}

/// Running tally across the container walk
#[derive(Debug, Default)]
struct Tally {
    evaluated: usize,
    verified: usize,
    skipped: usize,
}

/// Evaluates Pods against their configured signing keys
#[derive(Clone)]
pub struct PodVerifier {
    resolver: PublicKeyResolver,
    credentials: Arc<dyn CredentialProvider>,
    verifier: ContainerVerifier,
    health: Arc<HealthState>,
    settings: VerificationSettings,
}

impl PodVerifier {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        credentials: Arc<dyn CredentialProvider>,
        engine: Arc<dyn SignatureEngine>,
        health: Arc<HealthState>,
        settings: VerificationSettings,
    ) -> Self {
        Self {
            resolver: PublicKeyResolver::new(secrets, &settings.default_key_secret),
            credentials,
            verifier: ContainerVerifier::new(engine, health.clone()),
            health,
            settings,
        }
    }

    pub fn settings(&self) -> &VerificationSettings {
        &self.settings
    }

    /// Evaluate every container of the Pod and derive one decision.
    ///
    /// Registry credentials are built once before any container is looked at; a
    /// failure there aborts the request with [`EvaluationError::Credentials`].
    pub async fn evaluate(
        &self,
        request: &PodVerificationRequest,
    ) -> Result<Verdict, EvaluationError> {
        let deadline = Deadline::new(
            self.settings.call_timeout,
            self.settings.request_deadline,
        );

        let auth = self.build_credentials(request, &deadline).await?;

        let total = request.container_count();
        let mut tally = Tally::default();

        for (kind, container) in request.containers() {
            if deadline.is_expired() {
                warn!(
                    uid = %request.uid,
                    evaluated = tally.evaluated,
                    total,
                    "Request deadline exceeded before all containers were evaluated"
                );
                return Err(EvaluationError::DeadlineExceeded {
                    evaluated: tally.evaluated,
                    total,
                });
            }

            let outcome = self
                .run_container(kind, container, &request.namespace, &auth, &deadline)
                .await;
            tally.evaluated += 1;

            // A call cut short by the request deadline has no trustworthy outcome
            if deadline.is_expired() {
                warn!(
                    uid = %request.uid,
                    container = %container.name,
                    evaluated = tally.evaluated,
                    total,
                    "Request deadline exceeded while evaluating {}", kind
                );
                return Err(EvaluationError::DeadlineExceeded {
                    evaluated: tally.evaluated,
                    total,
                });
            }

            match outcome {
                VerificationOutcome::Skipped => tally.skipped += 1,
                VerificationOutcome::Verified => tally.verified += 1,
                VerificationOutcome::Failed(e) => {
                    warn!(
                        uid = %request.uid,
                        namespace = %request.namespace,
                        pod = %request.pod_name,
                        container = %container.name,
                        reason = e.reason(),
                        error = %e,
                        "Error verifying {}", kind
                    );
                    self.health.metrics.record_failure(e.reason());
                    return Ok(Verdict {
                        decision: AdmissionDecision::Deny {
                            uid: request.uid.clone(),
                            reason: e.reason().to_string(),
                            message: format!("[{}] {} {:?}: {}", e.reason(), kind, container.name, e),
                        },
                        notification: None,
                        verified: tally.verified,
                        skipped: tally.skipped,
                    });
                }
            }
        }

        let notification = if tally.verified > 0 {
            Notification::PodVerified
        } else {
            Notification::NoVerification
        };
        info!(
            uid = %request.uid,
            namespace = %request.namespace,
            pod = %request.pod_name,
            verified = tally.verified,
            skipped = tally.skipped,
            "Cosign verification passed"
        );

        Ok(Verdict {
            decision: AdmissionDecision::Allow {
                uid: request.uid.clone(),
                message: ALLOW_MESSAGE.to_string(),
            },
            notification: Some(notification),
            verified: tally.verified,
            skipped: tally.skipped,
        })
    }

    async fn build_credentials(
        &self,
        request: &PodVerificationRequest,
        deadline: &Deadline,
    ) -> Result<RegistryAuthContext, EvaluationError> {
        let budget = deadline.budget();
        let built = tokio::time::timeout(
            budget,
            self.credentials.build(
                &request.namespace,
                &request.service_account,
                &request.pull_secrets,
            ),
        )
        .await
        .unwrap_or(Err(CredentialError::Timeout(budget)));

        built.map_err(|e| {
            warn!(
                uid = %request.uid,
                namespace = %request.namespace,
                pod = %request.pod_name,
                error = %e,
                "Error initializing registry keychain"
            );
            EvaluationError::Credentials(e)
        })
    }

    /// Drive one container from `Pending` to a terminal state
    async fn run_container(
        &self,
        kind: ContainerKind,
        container: &ContainerSpec,
        namespace: &str,
        auth: &RegistryAuthContext,
        deadline: &Deadline,
    ) -> VerificationOutcome {
        let mut state = ContainerState::Pending;

        while !state.is_terminal() {
            state = match state {
                ContainerState::Pending => {
                    match self.resolver.resolve(container, namespace, deadline).await {
                        KeyLookup::Found(material) => ContainerState::KeyFound(material),
                        KeyLookup::NotFound => {
                            debug!(container = %container.name, "No public key, skipping {}", kind);
                            ContainerState::NoKey
                        }
                        KeyLookup::LookupError(e) => self.on_lookup_error(container, e),
                    }
                }
                ContainerState::KeyFound(material) => {
                    match self
                        .verifier
                        .verify(container, &material, auth, deadline)
                        .await
                    {
                        Ok(()) => ContainerState::Verified,
                        Err(e) => ContainerState::Failed(e),
                    }
                }
                terminal => terminal,
            };
        }

        state.into_outcome()
    }

    fn on_lookup_error(&self, container: &ContainerSpec, error: LookupError) -> ContainerState {
        self.health.metrics.record_lookup_error();
        match self.settings.lookup_error_policy {
            LookupErrorPolicy::FailOpen => {
                warn!(
                    container = %container.name,
                    error = %error,
                    "Public key lookup failed, skipping verification (fail-open)"
                );
                ContainerState::NoKey
            }
            LookupErrorPolicy::FailClosed => ContainerState::Failed(VerifyError::KeyLookupFailed {
                detail: error.to_string(),
            }),
        }
    }
}
