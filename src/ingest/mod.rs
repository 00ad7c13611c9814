//! Detection event intake
//!
//! ## Responsibilities
//!
//! - Hand the vision pipeline a cheap, non-blocking send handle
//! - Route all counter mutations through one owning task
//! - Mark the store dirty when a new object is counted
//!
//! Events for a stream are processed in arrival order; the send path
//! never blocks on I/O.

pub mod simulator;

use crate::count_store::FlushService;
use crate::counter_service::{DetectionEvent, ObserveOutcome, TrackingCounterService};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Create the detection event channel
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<DetectionEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, rx)
}

/// Clonable handle given to the detection event producer
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<DetectionEvent>,
}

impl EventSender {
    /// Enqueue an event without blocking; drops on overflow
    pub fn send(&self, event: DetectionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(error = %e, "Detection event dropped");
        }
    }
}

/// The single writer of counter state
pub struct IngestService {
    counter: Arc<TrackingCounterService>,
    flush: Arc<FlushService>,
}

impl IngestService {
    pub fn new(counter: Arc<TrackingCounterService>, flush: Arc<FlushService>) -> Self {
        Self { counter, flush }
    }

    /// Start draining the event channel
    pub fn start(
        self,
        mut rx: mpsc::Receiver<DetectionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_event = rx.recv() => match maybe_event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::info!("Event intake stopped");
        });
    }

    async fn handle(&self, event: DetectionEvent) {
        if let ObserveOutcome::New = self.counter.observe(&event).await {
            self.flush.mark_dirty();
        }
    }
}
