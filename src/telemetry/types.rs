//! Telemetry message schemas
//!
//! Closed set of messages published to the broker. Each variant carries a
//! fixed field schema and is tagged with `message_type` on the wire;
//! serialization happens only at this boundary.

use crate::counter_service::StreamSnapshot;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counting method reported in telemetry payloads
pub const COUNTING_METHOD: &str = "tracker_ids";

/// Telemetry message published to the broker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message_type")]
pub enum TelemetryMessage {
    #[serde(rename = "tracking_count_update")]
    CountUpdate(CountUpdate),
    #[serde(rename = "health_status")]
    HealthStatus(HealthStatus),
    #[serde(rename = "analytics_summary")]
    AnalyticsSummary(AnalyticsSummary),
}

impl TelemetryMessage {
    /// Serialize for publishing
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Per-stream live/session/total counts
#[derive(Debug, Clone, Serialize)]
pub struct CountUpdate {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub camera_name: String,
    pub location: String,
    pub counting_method: &'static str,
    pub unique_objects_tracked: u64,
    pub session_new_objects: u64,
    pub total_objects_detected: u64,
    pub tracked_object_ids: Vec<u64>,
}

impl CountUpdate {
    /// Build from a stream snapshot and its configured identity
    pub fn from_snapshot(snapshot: &StreamSnapshot, camera_name: &str, location: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            source_id: snapshot.stream_id.clone(),
            camera_name: camera_name.to_string(),
            location: location.to_string(),
            counting_method: COUNTING_METHOD,
            unique_objects_tracked: snapshot.live_count,
            session_new_objects: snapshot.session_count,
            total_objects_detected: snapshot.total_count,
            tracked_object_ids: snapshot.tracked_ids.clone(),
        }
    }
}

/// GPU utilization sample, present when nvidia-smi is available
#[derive(Debug, Clone, Serialize)]
pub struct GpuInfo {
    pub utilization_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
}

/// Process-wide liveness and resource metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub system_status: String,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub disk_usage: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuInfo>,
    pub active_streams: usize,
    pub total_objects_detected: u64,
    /// Seconds since process start
    pub uptime: u64,
}

/// Counts for one stream within the analytics summary
#[derive(Debug, Clone, Serialize)]
pub struct StreamBreakdown {
    pub unique: u64,
    pub session: u64,
    pub total: u64,
}

/// Cross-stream breakdown of live/session/total counts
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub timestamp: DateTime<Utc>,
    pub counting_method: &'static str,
    pub total_unique_objects_tracked: u64,
    pub total_session_new_objects: u64,
    pub total_persistent_count: u64,
    pub active_streams: usize,
    pub per_stream_breakdown: BTreeMap<String, StreamBreakdown>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StreamSnapshot {
        StreamSnapshot {
            stream_id: "0".to_string(),
            live_count: 3,
            session_count: 3,
            total_count: 103,
            last_updated: Some(Utc::now()),
            tracked_ids: vec![101, 102, 103],
        }
    }

    #[test]
    fn test_count_update_wire_format() {
        let msg = TelemetryMessage::CountUpdate(CountUpdate::from_snapshot(
            &snapshot(),
            "Camera 1",
            "Production Area 1",
        ));
        let value: serde_json::Value = serde_json::from_slice(&msg.to_payload().unwrap()).unwrap();

        assert_eq!(value["message_type"], "tracking_count_update");
        assert_eq!(value["source_id"], "0");
        assert_eq!(value["counting_method"], "tracker_ids");
        assert_eq!(value["unique_objects_tracked"], 3);
        assert_eq!(value["session_new_objects"], 3);
        assert_eq!(value["total_objects_detected"], 103);
        assert_eq!(
            value["tracked_object_ids"],
            serde_json::json!([101, 102, 103])
        );
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_health_status_wire_format() {
        let msg = TelemetryMessage::HealthStatus(HealthStatus {
            timestamp: Utc::now(),
            system_status: "healthy".to_string(),
            cpu_usage: 12.5,
            memory_usage: 40.0,
            disk_usage: 55.0,
            gpu: None,
            active_streams: 2,
            total_objects_detected: 110,
            uptime: 3600,
        });
        let value: serde_json::Value = serde_json::from_slice(&msg.to_payload().unwrap()).unwrap();

        assert_eq!(value["message_type"], "health_status");
        assert_eq!(value["system_status"], "healthy");
        assert_eq!(value["active_streams"], 2);
        assert_eq!(value["total_objects_detected"], 110);
        assert_eq!(value["uptime"], 3600);
        assert!(value.get("gpu").is_none());
    }

    #[test]
    fn test_analytics_summary_wire_format() {
        let msg = TelemetryMessage::AnalyticsSummary(AnalyticsSummary {
            timestamp: Utc::now(),
            counting_method: COUNTING_METHOD,
            total_unique_objects_tracked: 5,
            total_session_new_objects: 5,
            total_persistent_count: 110,
            active_streams: 2,
            per_stream_breakdown: BTreeMap::from([(
                "0".to_string(),
                StreamBreakdown {
                    unique: 3,
                    session: 3,
                    total: 103,
                },
            )]),
        });
        let value: serde_json::Value = serde_json::from_slice(&msg.to_payload().unwrap()).unwrap();

        assert_eq!(value["message_type"], "analytics_summary");
        assert_eq!(value["total_persistent_count"], 110);
        assert_eq!(value["per_stream_breakdown"]["0"]["unique"], 3);
        assert_eq!(value["per_stream_breakdown"]["0"]["session"], 3);
        assert_eq!(value["per_stream_breakdown"]["0"]["total"], 103);
    }
}
