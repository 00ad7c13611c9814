//! Synthetic detection feed
//!
//! Generates random tracker sightings so the engine can run end-to-end
//! without a vision pipeline attached. Enabled via `SIMULATE=true`.

use super::EventSender;
use crate::counter_service::DetectionEvent;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::watch;

/// Random event generator standing in for the vision pipeline
pub struct SimulationFeed {
    sender: EventSender,
    stream_ids: Vec<String>,
    tick: Duration,
}

impl SimulationFeed {
    pub fn new(sender: EventSender, stream_ids: Vec<String>) -> Self {
        Self {
            sender,
            stream_ids,
            tick: Duration::from_millis(500),
        }
    }

    /// Start emitting events until shutdown
    pub fn start(self, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            if self.stream_ids.is_empty() {
                tracing::warn!("Simulation feed has no streams configured");
                return;
            }
            tracing::info!(
                streams = self.stream_ids.len(),
                "Simulation feed started"
            );

            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(self.tick);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }

                if rng.gen_bool(0.3) {
                    let stream_id =
                        self.stream_ids[rng.gen_range(0..self.stream_ids.len())].clone();
                    self.sender.send(DetectionEvent {
                        stream_id,
                        tracker_id: rng.gen_range(1000..10000),
                        class_id: 0,
                        confidence: rng.gen_range(0.5..1.0),
                        timestamp: Utc::now(),
                    });
                }
            }
            tracing::debug!("Simulation feed stopped");
        });
    }
}
