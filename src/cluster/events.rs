//! Best-effort Kubernetes events for admitted Pods.
//!
//! The admission handler never waits on the API server for an event: it hands
//! the notification to an [`EventPublisher`], which queues it on a bounded
//! channel. A single background worker drains the queue into an [`EventSink`].
//! A full queue drops the event with a warning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::verification::Notification;

/// Reporting controller name on emitted events
pub const REPORTER: &str = "cosign-webhook";

/// Default queue depth between admission handlers and the event worker
pub const DEFAULT_EVENT_QUEUE: usize = 256;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("event sink rejected event: {0}")]
    Rejected(String),
}

/// Destination for Pod notifications
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        subject: &ObjectReference,
        notification: Notification,
    ) -> Result<(), EventError>;
}

/// Publishes events through the kube-rs event recorder
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        let instance = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok();
        Self {
            client,
            reporter: Reporter {
                controller: REPORTER.into(),
                instance,
            },
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        subject: &ObjectReference,
        notification: Notification,
    ) -> Result<(), EventError> {
        self.recorder()
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: notification.reason().into(),
                    note: Some(notification.message().into()),
                    action: "Admission".into(),
                    secondary: None,
                },
                subject,
            )
            .await?;
        Ok(())
    }
}

struct QueuedEvent {
    subject: ObjectReference,
    notification: Notification,
}

/// Handle used by admission handlers to queue events
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<QueuedEvent>,
}

impl EventPublisher {
    /// Start the event worker.
    ///
    /// The returned [`EventWorker`] owns the background task and must be shut
    /// down to flush queued events.
    pub fn start(sink: Arc<dyn EventSink>, capacity: usize) -> (EventPublisher, EventWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(sink, rx, shutdown_rx));

        (
            EventPublisher { tx },
            EventWorker {
                handle,
                shutdown_tx: Some(shutdown_tx),
            },
        )
    }

    /// Queue `notification` for `subject` without waiting.
    ///
    /// Returns `false` when the event was dropped.
    pub fn emit(&self, subject: ObjectReference, notification: Notification) -> bool {
        let pod = subject.name.clone().unwrap_or_default();
        match self.tx.try_send(QueuedEvent {
            subject,
            notification,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(pod = %pod, reason = %notification, "Event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(pod = %pod, reason = %notification, "Event worker stopped, dropping event");
                false
            }
        }
    }
}

/// Background task draining the event queue
pub struct EventWorker {
    handle: JoinHandle<usize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl EventWorker {
    /// Stop accepting events, publish what is queued and wait for the worker.
    ///
    /// Returns the number of events published over the worker's lifetime, or
    /// `None` if the worker did not finish within `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> Option<usize> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(published)) => {
                info!(published, "Event worker stopped");
                Some(published)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Event worker panicked");
                None
            }
            Err(_) => {
                warn!(grace = ?grace, "Event worker did not drain in time, aborting");
                self.handle.abort();
                None
            }
        }
    }
}

async fn run_worker(
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::Receiver<QueuedEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> usize {
    let mut published = 0;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => published += deliver(sink.as_ref(), event).await,
                None => return published,
            },
            _ = &mut shutdown_rx => break,
        }
    }

    // Drain whatever was queued before shutdown
    rx.close();
    while let Some(event) = rx.recv().await {
        published += deliver(sink.as_ref(), event).await;
    }
    published
}

async fn deliver(sink: &dyn EventSink, event: QueuedEvent) -> usize {
    let pod = event.subject.name.as_deref().unwrap_or_default();
    match sink.publish(&event.subject, event.notification).await {
        Ok(()) => {
            debug!(pod = %pod, reason = %event.notification, "Published event");
            1
        }
        Err(e) => {
            warn!(
                pod = %pod,
                reason = %event.notification,
                error = %e,
                "Failed to publish event"
            );
            0
        }
    }
}
