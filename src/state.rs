//! Application state
//!
//! Holds configuration and all shared components

use crate::count_store::{CountStore, FlushService};
use crate::counter_service::TrackingCounterService;
use crate::health_monitor::HealthMonitor;
use crate::telemetry::publisher::MqttPublisher;
use std::path::PathBuf;
use std::sync::Arc;

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker hostname
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Username (optional, anonymous when unset)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<String>,
    /// Client identifier
    pub client_id: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Per-publish timeout in milliseconds
    pub publish_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("MQTT_BROKER_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("MQTT_BROKER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1883),
            username: std::env::var("MQTT_BROKER_USER").ok(),
            password: std::env::var("MQTT_BROKER_PASS").ok(),
            client_id: std::env::var("MQTT_CLIENT_ID")
                .unwrap_or_else(|_| "countstream-tracking-counter".to_string()),
            keep_alive_secs: 30,
            publish_timeout_ms: std::env::var("MQTT_PUBLISH_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(2000),
        }
    }
}

/// Per-stream settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream identifier (matches the source id reported by the vision pipeline)
    pub stream_id: String,
    /// Display name included in count messages
    pub camera_name: String,
    /// Physical location included in count messages
    pub location: String,
    /// Topic for per-stream count updates
    pub topic: String,
    /// Confidence threshold override for this stream
    pub confidence_threshold: Option<f32>,
}

/// Publish cadences for the three telemetry message kinds
#[derive(Debug, Clone)]
pub struct PublishIntervals {
    /// Per-stream count update interval in seconds
    pub count_secs: u64,
    /// Health status interval in seconds
    pub health_secs: u64,
    /// Analytics summary interval in seconds
    pub analytics_secs: u64,
}

impl Default for PublishIntervals {
    fn default() -> Self {
        Self {
            count_secs: std::env::var("PUBLISH_COUNT_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1),
            health_secs: std::env::var("PUBLISH_HEALTH_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5),
            analytics_secs: std::env::var("PUBLISH_ANALYTICS_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker settings
    pub broker: BrokerConfig,
    /// Configured streams
    pub streams: Vec<StreamConfig>,
    /// Default confidence threshold for counting a detection
    pub confidence_threshold: f32,
    /// Idle time before a tracker id is dropped from the live set, seconds
    pub eviction_window_secs: u64,
    /// Interval between eviction passes, seconds
    pub eviction_interval_secs: u64,
    /// Telemetry publish cadences
    pub intervals: PublishIntervals,
    /// Topic for health status messages
    pub health_topic: String,
    /// Topic for analytics summary messages
    pub analytics_topic: String,
    /// Path of the persisted counts file
    pub persistence_path: PathBuf,
    /// Debounce window for coalescing persistence writes, milliseconds
    pub flush_debounce_ms: u64,
    /// Consecutive persistence failures tolerated before giving up
    pub persistence_failure_budget: u32,
    /// Deadline for the final flush on shutdown, seconds
    pub shutdown_flush_timeout_secs: u64,
    /// Interval between system metric samples, seconds
    pub health_sample_interval_secs: u64,
    /// Probe GPU utilization via nvidia-smi
    pub gpu_probe_enabled: bool,
    /// Generate synthetic detection events (no vision pipeline attached)
    pub simulate: bool,
    /// Capacity of the detection event queue
    pub event_queue_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let stream_ids = std::env::var("STREAMS").unwrap_or_else(|_| "0,1".to_string());
        let streams = stream_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(idx, id)| StreamConfig {
                stream_id: id.to_string(),
                camera_name: std::env::var(format!("STREAM_{}_NAME", id))
                    .unwrap_or_else(|_| format!("Camera {}", idx + 1)),
                location: std::env::var(format!("STREAM_{}_LOCATION", id))
                    .unwrap_or_else(|_| "unknown".to_string()),
                topic: std::env::var(format!("STREAM_{}_TOPIC", id))
                    .unwrap_or_else(|_| format!("camera{}/tracking", idx + 1)),
                confidence_threshold: std::env::var(format!("STREAM_{}_THRESHOLD", id))
                    .ok()
                    .and_then(|t| t.parse().ok()),
            })
            .collect();

        Self {
            broker: BrokerConfig::default(),
            streams,
            confidence_threshold: std::env::var("CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.5),
            eviction_window_secs: std::env::var("EVICTION_WINDOW_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(30),
            eviction_interval_secs: std::env::var("EVICTION_INTERVAL_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(5),
            intervals: PublishIntervals::default(),
            health_topic: std::env::var("HEALTH_TOPIC")
                .unwrap_or_else(|_| "telemetry/health".to_string()),
            analytics_topic: std::env::var("ANALYTICS_TOPIC")
                .unwrap_or_else(|_| "telemetry/analytics".to_string()),
            persistence_path: std::env::var("PERSISTENCE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/persistence/tracking_counts.json")),
            flush_debounce_ms: std::env::var("FLUSH_DEBOUNCE_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(200),
            persistence_failure_budget: std::env::var("PERSISTENCE_FAILURE_BUDGET")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(5),
            shutdown_flush_timeout_secs: std::env::var("SHUTDOWN_FLUSH_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(5),
            health_sample_interval_secs: std::env::var("HEALTH_SAMPLE_INTERVAL_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(5),
            gpu_probe_enabled: std::env::var("GPU_PROBE_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
            simulate: std::env::var("SIMULATE").map(|v| v == "true").unwrap_or(false),
            event_queue_capacity: std::env::var("EVENT_QUEUE_CAPACITY")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(1024),
        }
    }
}

/// Application state shared across background services
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Per-stream dedup counters
    pub counter: Arc<TrackingCounterService>,
    /// Durable count snapshots
    pub store: Arc<CountStore>,
    /// Batched persistence writer
    pub flush: Arc<FlushService>,
    /// Broker connection
    pub publisher: Arc<MqttPublisher>,
    /// System metrics + cross-stream aggregation
    pub health: Arc<HealthMonitor>,
}

/// Process lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Loading persisted counts, establishing broker connection
    Initializing,
    /// Normal operation
    Running,
    /// Intake stopped, final flush in progress
    ShuttingDown,
    /// Process about to exit
    Terminated,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Initializing => "initializing",
            EngineState::Running => "running",
            EngineState::ShuttingDown => "shutting_down",
            EngineState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Why the process is shutting down
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Termination signal received, clean stop
    Signal,
    /// Unrecoverable failure, exit non-zero so the supervisor restarts us
    Fatal(String),
}
