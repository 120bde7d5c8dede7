//! Admission webhook server.
//!
//! Serves `POST /validate` over TLS. The ValidatingWebhookConfiguration should
//! target Pod CREATE and UPDATE; DELETE requests are admitted without looking
//! at the Pod.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::Resource;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use super::response::{allow, bad_request, bad_request_for, internal_error, render_decision};
use crate::Observability;
use crate::error::{Error, Result};
use crate::verification::{ALLOW_MESSAGE, AdmissionDecision, PodVerificationRequest, PodVerifier};

/// Shared state for webhook handlers
pub struct WebhookState {
    pub verifier: PodVerifier,
    pub observability: Observability,
}

impl WebhookState {
    pub fn new(verifier: PodVerifier, observability: Observability) -> Self {
        Self {
            verifier,
            observability,
        }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate", post(validate_pod))
        .with_state(state)
}

async fn validate_pod(
    State(state): State<Arc<WebhookState>>,
    payload: std::result::Result<Json<AdmissionReview<Pod>>, JsonRejection>,
) -> impl IntoResponse {
    let started = Instant::now();
    state.observability.health.metrics.record_request();

    let (status, review) = match payload {
        Ok(Json(review)) => review_pod(&state, review).await,
        Err(rejection) => {
            error!(error = %rejection, "Failed to decode admission review");
            (
                StatusCode::BAD_REQUEST,
                bad_request(&format!("Invalid AdmissionReview: {rejection}")),
            )
        }
    };

    let decision = match review.response.as_ref() {
        Some(response) if response.allowed => "allow",
        Some(_) if status == StatusCode::OK => "deny",
        _ => "error",
    };
    state
        .observability
        .health
        .metrics
        .record_decision(decision, started.elapsed().as_secs_f64());

    (status, Json(review))
}

/// Evaluate one admission review for a Pod.
///
/// Returns the HTTP status to answer with and the response review. A best-effort
/// event is queued for allowed Pods after the decision is made.
pub async fn review_pod(
    state: &WebhookState,
    review: AdmissionReview<Pod>,
) -> (StatusCode, AdmissionReview<DynamicObject>) {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                bad_request(&format!("Invalid AdmissionReview: {e}")),
            );
        }
    };

    let uid = request.uid.clone();
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    if request.operation == Operation::Delete {
        info!(uid = %uid, "Admission request allowed (DELETE)");
        return (StatusCode::OK, allow(&request, ALLOW_MESSAGE));
    }

    let Some(pod) = request.object.as_ref() else {
        error!(uid = %uid, "Missing object in request");
        return (
            StatusCode::BAD_REQUEST,
            bad_request_for(&request, "Missing Pod object in admission request"),
        );
    };

    let verification =
        PodVerificationRequest::from_pod(&uid, pod, request.namespace.as_deref());

    let verdict = match state.verifier.evaluate(&verification).await {
        Ok(verdict) => verdict,
        Err(e) => {
            error!(uid = %uid, error = %e, "Admission request could not be evaluated");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                internal_error(&request, &e.to_string()),
            );
        }
    };

    match &verdict.decision {
        AdmissionDecision::Allow { .. } => {
            info!(
                uid = %uid,
                namespace = %verification.namespace,
                pod = %verification.pod_name,
                "Admission request allowed"
            );
        }
        AdmissionDecision::Deny { reason, message, .. } => {
            warn!(
                uid = %uid,
                namespace = %verification.namespace,
                pod = %verification.pod_name,
                reason = %reason,
                message = %message,
                "Admission request denied"
            );
        }
    }

    let review = render_decision(&request, &verdict.decision);

    if let Some(notification) = verdict.notification {
        state
            .observability
            .events
            .emit(event_subject(pod, &request, &verification), notification);
    }

    (StatusCode::OK, review)
}

/// Object reference the Pod's events are attached to
fn event_subject(
    pod: &Pod,
    request: &AdmissionRequest<Pod>,
    verification: &PodVerificationRequest,
) -> ObjectReference {
    let mut subject = pod.object_ref(&());
    subject.namespace = Some(verification.namespace.clone());
    if subject.name.as_deref().unwrap_or_default().is_empty() {
        subject.name = Some(if request.name.is_empty() {
            verification.pod_name.clone()
        } else {
            request.name.clone()
        });
    }
    subject
}

/// Load the serving certificate and key
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| Error::Tls(format!("{}: {e}", cert_path.display())))
}

/// Run the webhook server with TLS
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    port: u16,
    tls: RustlsConfig,
) -> Result<()> {
    let app = create_webhook_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    Ok(())
}
