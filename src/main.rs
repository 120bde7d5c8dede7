//! cosign-webhook - Kubernetes admission webhook for cosign image signatures.
//!
//! This is the main entry point that:
//! - Parses configuration and initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the event worker, the health server and the TLS webhook server
//! - Drains queued events on shutdown

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use cosign_webhook::cluster::events::DEFAULT_EVENT_QUEUE;
use cosign_webhook::cluster::{EventPublisher, KubeEventSink};
use cosign_webhook::health::{HealthState, run_health_server};
use cosign_webhook::webhooks::load_tls_config;
use cosign_webhook::{Config, Error, Observability, build_webhook_state, run_webhook_server};

/// Time allowed for queued events to be published during shutdown
const EVENT_DRAIN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_directive().parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    config.validate()?;

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!(
        port = config.port,
        metrics_port = config.metrics_port,
        lookup_error_policy = %config.lookup_error_policy,
        "Starting cosign-webhook"
    );

    // Create Kubernetes client
    let client = Client::try_default().await.map_err(Error::from)?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    let (events, event_worker) = EventPublisher::start(
        Arc::new(KubeEventSink::new(client.clone())),
        DEFAULT_EVENT_QUEUE,
    );
    let observability = Observability::new(health_state.clone(), events);

    // Probes and metrics come up first so the kubelet can see the process
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Readiness waits for the serving certificate; a missing one is fatal
    let tls = load_tls_config(&config.tls_cert_file, &config.tls_key_file).await?;

    let webhook_handle = {
        let state = Arc::new(build_webhook_state(client, &config, observability));
        let port = config.port;
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, port, tls).await {
                error!("Webhook server error: {}", e);
            }
        })
    };

    health_state.set_ready(true).await;
    info!("Webhook ready");

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    // Stop advertising readiness before the event queue is drained
    health_state.set_ready(false).await;
    event_worker
        .shutdown(Duration::from_secs(EVENT_DRAIN_GRACE_PERIOD_SECS))
        .await;

    info!("Webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal; the webhook cannot shut down
/// gracefully without them.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
