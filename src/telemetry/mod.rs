//! Telemetry - message schemas, broker client and publish scheduling

pub mod publisher;
pub mod scheduler;
pub mod types;

pub use publisher::{ConnectionState, MqttPublisher, TelemetrySink};
pub use scheduler::TelemetryScheduler;
pub use types::{
    AnalyticsSummary, CountUpdate, GpuInfo, HealthStatus, StreamBreakdown, TelemetryMessage,
};
