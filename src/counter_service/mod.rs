//! Tracking Counter Service
//!
//! ## Responsibilities
//!
//! - Deduplicate per-frame tracker sightings into unique-object counts
//! - Maintain live/session/total counters per stream
//! - Evict tracker ids idle longer than the eviction window
//! - Serve consistent snapshots to persistence and telemetry
//!
//! A tracker id is counted once while it stays in the live set. Eviction
//! never decrements counters; if the upstream tracker later reuses an
//! evicted id for a different object it is counted as new. Counting by
//! tracker id is an approximation and the eviction window is its tunable.

mod types;

pub use types::{DetectionEvent, ObserveOutcome, StreamSnapshot, TrackedObject};

use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Mutable counter state for one stream
#[derive(Debug, Default)]
struct StreamCounterState {
    live: HashMap<u64, TrackedObject>,
    session_count: u64,
    total_count: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl StreamCounterState {
    fn snapshot(&self, stream_id: &str) -> StreamSnapshot {
        let mut tracked_ids: Vec<u64> = self.live.keys().copied().collect();
        tracked_ids.sort_unstable();
        StreamSnapshot {
            stream_id: stream_id.to_string(),
            live_count: self.live.len() as u64,
            session_count: self.session_count,
            total_count: self.total_count,
            last_updated: self.last_updated,
            tracked_ids,
        }
    }
}

/// Deduplicates detection events and owns all counter mutations.
///
/// `observe` must be called from a single ingest task and `evict_stale`
/// from a single eviction task; everything else reads snapshots.
pub struct TrackingCounterService {
    streams: RwLock<HashMap<String, StreamCounterState>>,
    default_threshold: f32,
    thresholds: HashMap<String, f32>,
}

impl TrackingCounterService {
    /// Create a new counter service with a global confidence threshold
    pub fn new(default_threshold: f32) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            default_threshold,
            thresholds: HashMap::new(),
        }
    }

    /// Override the confidence threshold for one stream
    pub fn with_stream_threshold(mut self, stream_id: &str, threshold: f32) -> Self {
        self.thresholds.insert(stream_id.to_string(), threshold);
        self
    }

    fn threshold_for(&self, stream_id: &str) -> f32 {
        self.thresholds
            .get(stream_id)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Pre-create zeroed counter state for the configured streams
    pub async fn register_streams<I>(&self, stream_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut streams = self.streams.write().await;
        for id in stream_ids {
            streams.entry(id).or_default();
        }
    }

    /// Seed total counts from a persisted snapshot.
    ///
    /// Session counts always start at zero for a new process.
    pub async fn restore_totals(&self, totals: HashMap<String, u64>) {
        let mut streams = self.streams.write().await;
        for (stream_id, total) in totals {
            let state = streams.entry(stream_id.clone()).or_default();
            state.total_count = total;
            tracing::info!(
                stream_id = %stream_id,
                total_count = total,
                "Restored persisted total"
            );
        }
    }

    /// Process one detection event
    pub async fn observe(&self, event: &DetectionEvent) -> ObserveOutcome {
        if event.confidence < self.threshold_for(&event.stream_id) {
            tracing::trace!(
                stream_id = %event.stream_id,
                tracker_id = event.tracker_id,
                confidence = event.confidence,
                "Detection below confidence threshold"
            );
            return ObserveOutcome::Rejected;
        }

        let mut streams = self.streams.write().await;
        let state = streams.entry(event.stream_id.clone()).or_default();

        match state.live.entry(event.tracker_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_seen = event.timestamp;
                state.last_updated = Some(event.timestamp);
                ObserveOutcome::Refreshed
            }
            Entry::Vacant(entry) => {
                entry.insert(TrackedObject {
                    first_seen: event.timestamp,
                    last_seen: event.timestamp,
                });
                state.session_count += 1;
                state.total_count += 1;
                state.last_updated = Some(event.timestamp);
                tracing::info!(
                    stream_id = %event.stream_id,
                    tracker_id = event.tracker_id,
                    class_id = event.class_id,
                    session_count = state.session_count,
                    total_count = state.total_count,
                    "New object tracked"
                );
                ObserveOutcome::New
            }
        }
    }

    /// Drop tracker ids whose last sighting is older than `window`.
    ///
    /// Counters are untouched; eviction only bounds the live set.
    /// Returns the number of evicted ids.
    pub async fn evict_stale(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut streams = self.streams.write().await;
        let mut evicted = 0;
        for (stream_id, state) in streams.iter_mut() {
            let before = state.live.len();
            state
                .live
                .retain(|_, obj| now.signed_duration_since(obj.last_seen) <= window);
            let removed = before - state.live.len();
            if removed > 0 {
                evicted += removed;
                tracing::debug!(
                    stream_id = %stream_id,
                    evicted = removed,
                    live_count = state.live.len(),
                    "Evicted stale tracker ids"
                );
            }
        }
        evicted
    }

    /// Consistent view of one stream; unknown streams yield the empty snapshot
    pub async fn snapshot(&self, stream_id: &str) -> StreamSnapshot {
        let streams = self.streams.read().await;
        streams
            .get(stream_id)
            .map(|state| state.snapshot(stream_id))
            .unwrap_or_else(|| StreamSnapshot::empty(stream_id))
    }

    /// Consistent view of every known stream, ordered by stream id
    pub async fn snapshot_all(&self) -> Vec<StreamSnapshot> {
        let streams = self.streams.read().await;
        let mut snapshots: Vec<StreamSnapshot> = streams
            .iter()
            .map(|(id, state)| state.snapshot(id))
            .collect();
        snapshots.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stream_id: &str, tracker_id: u64, confidence: f32) -> DetectionEvent {
        DetectionEvent {
            stream_id: stream_id.to_string(),
            tracker_id,
            class_id: 0,
            confidence,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_sighting_is_new() {
        let counter = TrackingCounterService::new(0.5);
        let outcome = counter.observe(&event("0", 1, 0.9)).await;
        assert_eq!(outcome, ObserveOutcome::New);

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.live_count, 1);
        assert_eq!(snap.session_count, 1);
        assert_eq!(snap.total_count, 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let counter = TrackingCounterService::new(0.5);
        counter.observe(&event("0", 7, 0.9)).await;
        for _ in 0..5 {
            let outcome = counter.observe(&event("0", 7, 0.9)).await;
            assert_eq!(outcome, ObserveOutcome::Refreshed);
        }

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.session_count, 1);
        assert_eq!(snap.total_count, 1);
    }

    #[tokio::test]
    async fn test_n_distinct_ids_count_n() {
        let counter = TrackingCounterService::new(0.5);
        for id in 1..=20 {
            counter.observe(&event("0", id, 0.9)).await;
        }

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.total_count, 20);
        assert_eq!(snap.session_count, 20);
        assert_eq!(snap.live_count, 20);
    }

    #[tokio::test]
    async fn test_low_confidence_rejected() {
        let counter = TrackingCounterService::new(0.5);
        let outcome = counter.observe(&event("0", 1, 0.3)).await;
        assert_eq!(outcome, ObserveOutcome::Rejected);
        assert_eq!(counter.snapshot("0").await.total_count, 0);
    }

    #[tokio::test]
    async fn test_per_stream_threshold_override() {
        let counter = TrackingCounterService::new(0.5).with_stream_threshold("strict", 0.9);
        assert_eq!(
            counter.observe(&event("strict", 1, 0.8)).await,
            ObserveOutcome::Rejected
        );
        assert_eq!(
            counter.observe(&event("0", 1, 0.8)).await,
            ObserveOutcome::New
        );
    }

    #[tokio::test]
    async fn test_eviction_keeps_counts_and_reuse_counts_again() {
        let counter = TrackingCounterService::new(0.5);
        counter.observe(&event("0", 42, 0.9)).await;

        let later = Utc::now() + Duration::seconds(120);
        let evicted = counter.evict_stale(later, Duration::seconds(30)).await;
        assert_eq!(evicted, 1);

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.live_count, 0);
        assert_eq!(snap.total_count, 1);
        assert_eq!(snap.session_count, 1);

        // Same numeric id after eviction is a different object
        let outcome = counter.observe(&event("0", 42, 0.9)).await;
        assert_eq!(outcome, ObserveOutcome::New);
        let snap = counter.snapshot("0").await;
        assert_eq!(snap.total_count, 2);
        assert_eq!(snap.session_count, 2);
    }

    #[tokio::test]
    async fn test_eviction_spares_recent_ids() {
        let counter = TrackingCounterService::new(0.5);
        counter.observe(&event("0", 1, 0.9)).await;
        let evicted = counter
            .evict_stale(Utc::now(), Duration::seconds(30))
            .await;
        assert_eq!(evicted, 0);
        assert_eq!(counter.snapshot("0").await.live_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_stream_yields_empty_snapshot() {
        let counter = TrackingCounterService::new(0.5);
        let snap = counter.snapshot("nope").await;
        assert_eq!(snap.stream_id, "nope");
        assert_eq!(snap.live_count, 0);
        assert_eq!(snap.total_count, 0);
        assert!(snap.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_restore_totals_keeps_session_at_zero() {
        let counter = TrackingCounterService::new(0.5);
        counter
            .restore_totals(HashMap::from([("0".to_string(), 100)]))
            .await;

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.total_count, 100);
        assert_eq!(snap.session_count, 0);
        assert_eq!(snap.live_count, 0);
    }

    #[tokio::test]
    async fn test_concrete_scenario_with_restored_total() {
        let counter = TrackingCounterService::new(0.5);
        counter
            .restore_totals(HashMap::from([("0".to_string(), 100)]))
            .await;

        for (id, conf) in [(101u64, 0.9f32), (102, 0.8), (101, 0.9), (103, 0.95)] {
            counter.observe(&event("0", id, conf)).await;
        }

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.tracked_ids, vec![101, 102, 103]);
        assert_eq!(snap.session_count, 3);
        assert_eq!(snap.total_count, 103);
    }

    #[tokio::test]
    async fn test_concrete_scenario_with_strict_threshold() {
        let counter = TrackingCounterService::new(0.85);
        counter
            .restore_totals(HashMap::from([("0".to_string(), 100)]))
            .await;

        for (id, conf) in [(101u64, 0.9f32), (102, 0.8), (101, 0.9), (103, 0.95)] {
            counter.observe(&event("0", id, conf)).await;
        }

        let snap = counter.snapshot("0").await;
        assert_eq!(snap.session_count, 2);
        assert_eq!(snap.total_count, 102);
    }

    #[tokio::test]
    async fn test_session_never_exceeds_total() {
        let counter = TrackingCounterService::new(0.5);
        counter
            .restore_totals(HashMap::from([("0".to_string(), 3)]))
            .await;
        for id in 1..=5 {
            counter.observe(&event("0", id, 0.9)).await;
        }

        let snap = counter.snapshot("0").await;
        assert!(snap.session_count <= snap.total_count);
        assert!(snap.live_count <= snap.total_count);
    }

    #[tokio::test]
    async fn test_snapshot_all_ordered_and_registered() {
        let counter = TrackingCounterService::new(0.5);
        counter
            .register_streams(["b".to_string(), "a".to_string()])
            .await;
        counter.observe(&event("c", 1, 0.9)).await;

        let snapshots = counter.snapshot_all().await;
        let ids: Vec<&str> = snapshots.iter().map(|s| s.stream_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
