//! Telemetry Scheduler
//!
//! Runs three independent publish loops against configured cadences:
//! per-stream count updates, health status and the analytics summary.
//! Each tick reads the latest snapshot and publishes one message per
//! applicable topic; a failed publish drops that tick's message. The
//! loops never touch the event-arrival path.

use super::publisher::TelemetrySink;
use super::types::{CountUpdate, TelemetryMessage};
use crate::counter_service::TrackingCounterService;
use crate::health_monitor::HealthMonitor;
use crate::state::{PublishIntervals, StreamConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Interval whose first tick fires one full period after start
fn new_ticker(period_secs: u64) -> Interval {
    let period = Duration::from_secs(period_secs);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Periodic telemetry publisher
pub struct TelemetryScheduler {
    counter: Arc<TrackingCounterService>,
    aggregator: Arc<HealthMonitor>,
    sink: Arc<dyn TelemetrySink>,
    streams: Vec<StreamConfig>,
    health_topic: String,
    analytics_topic: String,
    intervals: PublishIntervals,
}

impl TelemetryScheduler {
    pub fn new(
        counter: Arc<TrackingCounterService>,
        aggregator: Arc<HealthMonitor>,
        sink: Arc<dyn TelemetrySink>,
        streams: Vec<StreamConfig>,
        health_topic: String,
        analytics_topic: String,
        intervals: PublishIntervals,
    ) -> Self {
        Self {
            counter,
            aggregator,
            sink,
            streams,
            health_topic,
            analytics_topic,
            intervals,
        }
    }

    /// Start the three publish loops
    pub async fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            count_secs = self.intervals.count_secs,
            health_secs = self.intervals.health_secs,
            analytics_secs = self.intervals.analytics_secs,
            streams = self.streams.len(),
            "Telemetry scheduler started"
        );

        let scheduler = self.clone();
        let mut stop = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = new_ticker(scheduler.intervals.count_secs);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.publish_counts().await,
                    _ = stop.changed() => break,
                }
            }
        });

        let scheduler = self.clone();
        let mut stop = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = new_ticker(scheduler.intervals.health_secs);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.publish_health().await,
                    _ = stop.changed() => break,
                }
            }
        });

        let scheduler = self;
        let mut stop = shutdown;
        tokio::spawn(async move {
            let mut ticker = new_ticker(scheduler.intervals.analytics_secs);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.publish_analytics().await,
                    _ = stop.changed() => break,
                }
            }
        });
    }

    /// One count update per configured stream
    async fn publish_counts(&self) {
        for stream in &self.streams {
            let snapshot = self.counter.snapshot(&stream.stream_id).await;
            let message = TelemetryMessage::CountUpdate(CountUpdate::from_snapshot(
                &snapshot,
                &stream.camera_name,
                &stream.location,
            ));
            self.publish(&stream.topic, &message).await;
        }
    }

    async fn publish_health(&self) {
        let message = TelemetryMessage::HealthStatus(self.aggregator.sample().await);
        self.publish(&self.health_topic, &message).await;
    }

    async fn publish_analytics(&self) {
        let message = TelemetryMessage::AnalyticsSummary(self.aggregator.summarize().await);
        self.publish(&self.analytics_topic, &message).await;
    }

    async fn publish(&self, topic: &str, message: &TelemetryMessage) {
        let payload = match message.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, topic = %topic, "Failed to serialize telemetry message");
                return;
            }
        };
        if let Err(e) = self.sink.publish(topic, payload).await {
            tracing::debug!(error = %e, topic = %topic, "Telemetry message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct RecordingSink {
        published: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }

        async fn counts_by_topic(&self) -> HashMap<String, usize> {
            let mut counts = HashMap::new();
            for topic in self.published.lock().await.iter() {
                *counts.entry(topic.clone()).or_insert(0) += 1;
            }
            counts
        }
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<()> {
            self.published.lock().await.push(topic.to_string());
            Ok(())
        }
    }

    fn stream_config(id: &str, topic: &str) -> StreamConfig {
        StreamConfig {
            stream_id: id.to_string(),
            camera_name: format!("Camera {}", id),
            location: "test".to_string(),
            topic: topic.to_string(),
            confidence_threshold: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_over_ten_seconds() {
        let counter = Arc::new(TrackingCounterService::new(0.5));
        let aggregator = HealthMonitor::new(counter.clone(), 30, false);
        let sink = Arc::new(RecordingSink::new());

        let scheduler = Arc::new(TelemetryScheduler::new(
            counter,
            aggregator,
            sink.clone(),
            vec![stream_config("0", "camera1/tracking")],
            "telemetry/health".to_string(),
            "telemetry/analytics".to_string(),
            PublishIntervals {
                count_secs: 1,
                health_secs: 5,
                analytics_secs: 10,
            },
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        scheduler.start(stop_rx).await;

        // Run half a period past the 10 s mark so boundary ticks settle
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let _ = stop_tx.send(true);

        let counts = sink.counts_by_topic().await;
        assert_eq!(counts.get("camera1/tracking"), Some(&10));
        assert_eq!(counts.get("telemetry/health"), Some(&2));
        assert_eq!(counts.get("telemetry/analytics"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_published_per_stream() {
        let counter = Arc::new(TrackingCounterService::new(0.5));
        let aggregator = HealthMonitor::new(counter.clone(), 30, false);
        let sink = Arc::new(RecordingSink::new());

        let scheduler = Arc::new(TelemetryScheduler::new(
            counter,
            aggregator,
            sink.clone(),
            vec![
                stream_config("0", "camera1/tracking"),
                stream_config("1", "camera2/tracking"),
            ],
            "telemetry/health".to_string(),
            "telemetry/analytics".to_string(),
            PublishIntervals {
                count_secs: 1,
                health_secs: 60,
                analytics_secs: 60,
            },
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        scheduler.start(stop_rx).await;

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let _ = stop_tx.send(true);

        let counts = sink.counts_by_topic().await;
        assert_eq!(counts.get("camera1/tracking"), Some(&3));
        assert_eq!(counts.get("camera2/tracking"), Some(&3));
    }
}
