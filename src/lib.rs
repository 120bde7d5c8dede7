//! cosign-webhook library crate
//!
//! Admission webhook that admits a Pod only when every container image with a
//! configured public key carries a valid cosign signature.

pub mod cluster;
pub mod config;
pub mod cosign;
pub mod error;
pub mod health;
pub mod registry;
pub mod verification;
pub mod webhooks;

pub use config::Config;
pub use error::{Error, Result};
pub use health::HealthState;
pub use webhooks::{WebhookState, run_webhook_server};

use std::sync::Arc;

use kube::Client;

use cluster::{EventPublisher, KubeSecretStore};
use cosign::CosignEngine;
use registry::KubeKeychain;
use verification::PodVerifier;

/// Metrics and event handles shared by every admission request
#[derive(Clone)]
pub struct Observability {
    pub health: Arc<HealthState>,
    pub events: EventPublisher,
}

impl Observability {
    pub fn new(health: Arc<HealthState>, events: EventPublisher) -> Self {
        Self { health, events }
    }
}

/// Wire the Kubernetes-backed collaborators into a webhook state
pub fn build_webhook_state(client: Client, config: &Config, observability: Observability) -> WebhookState {
    let verifier = PodVerifier::new(
        Arc::new(KubeSecretStore::new(client.clone())),
        Arc::new(KubeKeychain::new(client)),
        Arc::new(CosignEngine::new()),
        observability.health.clone(),
        config.verifier_settings(),
    );
    WebhookState::new(verifier, observability)
}
