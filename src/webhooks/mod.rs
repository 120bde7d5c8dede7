//! Validating admission webhook for Pods.
//!
//! The handler decodes the `AdmissionReview`, hands the Pod to the
//! [`PodVerifier`](crate::verification::PodVerifier) and renders its decision.

pub mod response;
mod server;

pub use server::{
    WebhookState, create_webhook_router, load_tls_config, review_pod, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
