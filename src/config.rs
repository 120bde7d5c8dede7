//! Process configuration.
//!
//! Every flag can also be set through the environment variable named in its
//! help text.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};
use crate::verification::{DEFAULT_KEY_SECRET, LookupErrorPolicy, VerificationSettings};

/// Default path to the webhook TLS certificate
pub const DEFAULT_TLS_CERT_FILE: &str = "/etc/certs/tls.crt";
/// Default path to the webhook TLS private key
pub const DEFAULT_TLS_KEY_FILE: &str = "/etc/certs/tls.key";
/// Default admission endpoint port
pub const DEFAULT_WEBHOOK_PORT: u16 = 8080;
/// Default health and metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8081;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cosign-webhook",
    about = "Admission webhook verifying cosign signatures of Pod images",
    version
)]
pub struct Config {
    /// TLS certificate served by the admission endpoint
    #[arg(long, env = "TLS_CERT_FILE", default_value = DEFAULT_TLS_CERT_FILE)]
    pub tls_cert_file: PathBuf,

    /// TLS private key for the admission endpoint
    #[arg(long, env = "TLS_KEY_FILE", default_value = DEFAULT_TLS_KEY_FILE)]
    pub tls_key_file: PathBuf,

    /// Log level for this crate
    #[arg(
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Port of the TLS admission endpoint
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    pub port: u16,

    /// Port serving /healthz, /readyz and /metrics
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Timeout for each secret fetch, credential build and signature check
    #[arg(long, env = "K8S_TIMEOUT_SECS", default_value_t = 10)]
    pub k8s_timeout_secs: u64,

    /// Deadline for evaluating one admission request
    #[arg(long, env = "REQUEST_DEADLINE_SECS", default_value_t = 25)]
    pub request_deadline_secs: u64,

    /// What a failed public key lookup means
    #[arg(long, env = "LOOKUP_ERROR_POLICY", value_enum, default_value_t = LookupErrorPolicy::FailOpen)]
    pub lookup_error_policy: LookupErrorPolicy,

    /// Namespace-wide secret holding the fallback public key
    #[arg(long, env = "DEFAULT_KEY_SECRET", default_value = DEFAULT_KEY_SECRET)]
    pub default_key_secret: String,
}

impl Config {
    /// Reject combinations clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.k8s_timeout_secs == 0 {
            return Err(Error::Config("--k8s-timeout-secs must be positive".to_string()));
        }
        if self.request_deadline_secs == 0 {
            return Err(Error::Config(
                "--request-deadline-secs must be positive".to_string(),
            ));
        }
        if self.port == self.metrics_port {
            return Err(Error::Config(format!(
                "--port and --metrics-port must differ (both {})",
                self.port
            )));
        }
        if self.default_key_secret.trim().is_empty() {
            return Err(Error::Config("--default-key-secret must not be empty".to_string()));
        }
        Ok(())
    }

    /// Filter directive applied on top of `RUST_LOG`
    pub fn log_directive(&self) -> String {
        format!("cosign_webhook={}", self.log_level)
    }

    /// Runtime settings for the Pod verifier
    pub fn verifier_settings(&self) -> VerificationSettings {
        VerificationSettings {
            call_timeout: Duration::from_secs(self.k8s_timeout_secs),
            request_deadline: Duration::from_secs(self.request_deadline_secs),
            lookup_error_policy: self.lookup_error_policy,
            default_key_secret: self.default_key_secret.trim().to_string(),
        }
    }
}
