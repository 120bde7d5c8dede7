//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve admission requests)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Label for admission decisions (`allow`, `deny`, `error`)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DecisionLabels {
    pub decision: String,
}

impl EncodeLabelSet for DecisionLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("decision", self.decision.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Label for verification failures, keyed by error reason
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReasonLabels {
    pub reason: String,
}

impl EncodeLabelSet for ReasonLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("reason", self.reason.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admission requests received
    pub processed_ops: Counter,
    /// Container images whose signature verified
    pub processed_verified: Counter,
    /// Admission responses by decision
    pub decisions_total: Family<DecisionLabels, Counter>,
    /// Denies by failure reason
    pub verification_failures_total: Family<ReasonLabels, Counter>,
    /// Secret lookups that errored rather than returned "not found"
    pub key_lookup_errors_total: Counter,
    /// Admission request latency
    pub request_duration_seconds: Histogram,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counter names get a `_total` suffix on encoding
        let processed_ops = Counter::default();
        registry.register(
            "cosign_processed_ops",
            "The total number of processed events",
            processed_ops.clone(),
        );

        let processed_verified = Counter::default();
        registry.register(
            "cosign_processed_verified",
            "The number of verified events",
            processed_verified.clone(),
        );

        let decisions_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "cosign_admission_decisions",
            "Admission responses by decision",
            decisions_total.clone(),
        );

        let verification_failures_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "cosign_verification_failures",
            "Denied admission requests by failure reason",
            verification_failures_total.clone(),
        );

        let key_lookup_errors_total = Counter::default();
        registry.register(
            "cosign_key_lookup_errors",
            "Public key secret lookups that failed with an error",
            key_lookup_errors_total.clone(),
        );

        let request_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 14));
        registry.register(
            "cosign_request_duration_seconds",
            "Duration of admission request handling in seconds",
            request_duration_seconds.clone(),
        );

        Self {
            processed_ops,
            processed_verified,
            decisions_total,
            verification_failures_total,
            key_lookup_errors_total,
            request_duration_seconds,
            registry,
        }
    }

    /// Record an incoming admission request
    pub fn record_request(&self) {
        self.processed_ops.inc();
    }

    /// Record one successful image verification
    pub fn record_verified(&self) {
        self.processed_verified.inc();
    }

    pub fn verified_count(&self) -> u64 {
        self.processed_verified.get()
    }

    /// Record a deny caused by `reason`
    pub fn record_failure(&self, reason: &str) {
        let labels = ReasonLabels {
            reason: reason.to_string(),
        };
        self.verification_failures_total
            .get_or_create(&labels)
            .inc();
    }

    pub fn record_lookup_error(&self) {
        self.key_lookup_errors_total.inc();
    }

    /// Record the outcome and latency of one admission request
    pub fn record_decision(&self, decision: &str, duration_secs: f64) {
        let labels = DecisionLabels {
            decision: decision.to_string(),
        };
        self.decisions_total.get_or_create(&labels).inc();
        self.request_duration_seconds.observe(duration_secs);
    }

    pub fn decision_count(&self, decision: &str) -> u64 {
        let labels = DecisionLabels {
            decision: decision.to_string(),
        };
        self.decisions_total.get_or_create(&labels).get()
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook is serving admission requests
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the admission server is listening
/// and again once shutdown has started.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on plain HTTP
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> crate::Result<()> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
