//! Kubernetes-backed collaborators of the verification core.
//!
//! - [`KubeSecretStore`]: public key lookups from Secrets
//! - [`KubeEventSink`] and [`EventPublisher`]: best-effort Pod events

pub mod events;
pub mod secrets;

pub use events::{EventError, EventPublisher, EventSink, EventWorker, KubeEventSink};
pub use secrets::KubeSecretStore;
