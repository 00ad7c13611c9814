//! countstream - Tracking-Based Object Counting & Telemetry Engine
//!
//! Consumes per-frame "tracker id seen" events from a vision pipeline,
//! deduplicates them into unique-object counts per stream, keeps totals
//! durable across restarts, and publishes live counts, health status and
//! analytics summaries to an MQTT broker on fixed cadences.
//!
//! ## Architecture (6 components)
//!
//! 1. TrackingCounterService - per-stream dedup and counters
//! 2. CountStore / FlushService - durable snapshots (atomic JSON file)
//! 3. IngestService - single-writer event intake
//! 4. MqttPublisher - broker connection lifecycle
//! 5. TelemetryScheduler - periodic publishing
//! 6. HealthMonitor - system metrics and cross-stream aggregation
//!
//! ## Design Principles
//!
//! - Counter state has one writer; everything else reads snapshots
//! - The event path never blocks on I/O
//! - Telemetry is best-effort; persistence is atomic and fail-soft

pub mod count_store;
pub mod counter_service;
pub mod error;
pub mod health_monitor;
pub mod ingest;
pub mod state;
pub mod telemetry;

pub use counter_service::{DetectionEvent, ObserveOutcome};
pub use error::{Error, Result};
pub use ingest::EventSender;
pub use state::AppState;
