//! Counter service data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-frame sighting of a tracked object, produced by the vision pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub stream_id: String,
    /// Tracker-assigned id, stable while the object stays tracked.
    /// May be reused for a different object after the tracker drops it.
    pub tracker_id: u64,
    pub class_id: i32,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// Result of observing a detection event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// Tracker id entered the live set, counters incremented
    New,
    /// Tracker id already live, last_seen refreshed only
    Refreshed,
    /// Confidence below threshold, no state change
    Rejected,
}

/// Bookkeeping for one live tracker id
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Consistent point-in-time view of one stream's counters
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub stream_id: String,
    /// Tracker ids currently in the live set
    pub live_count: u64,
    /// Unique objects counted since process start
    pub session_count: u64,
    /// Unique objects counted across all process lifetimes
    pub total_count: u64,
    /// Last counter mutation, None until the first event
    pub last_updated: Option<DateTime<Utc>>,
    /// Live tracker ids, ascending
    pub tracked_ids: Vec<u64>,
}

impl StreamSnapshot {
    /// Zeroed snapshot for a stream with no recorded state
    pub fn empty(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            live_count: 0,
            session_count: 0,
            total_count: 0,
            last_updated: None,
            tracked_ids: Vec::new(),
        }
    }
}
