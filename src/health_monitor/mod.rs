//! Health Monitor - system metrics and cross-stream aggregation
//!
//! ## Responsibilities
//!
//! - Sample CPU/memory/disk (optionally GPU) on a fixed interval
//! - Build health status messages from metrics plus counter totals
//! - Build the cross-stream analytics summary
//!
//! Pure projection of current state; keeps no durable state of its own.

use crate::counter_service::TrackingCounterService;
use crate::telemetry::types::{AnalyticsSummary, GpuInfo, HealthStatus, StreamBreakdown, COUNTING_METHOD};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tokio::sync::{watch, RwLock};

/// CPU/memory/disk utilization above which health reports "warning"
const CPU_WARN_PERCENT: f32 = 80.0;
const MEMORY_WARN_PERCENT: f32 = 85.0;

/// Latest system resource sample
#[derive(Debug, Clone, Default)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub gpu: Option<GpuInfo>,
}

/// Samples system metrics and aggregates counter state for telemetry
pub struct HealthMonitor {
    counter: Arc<TrackingCounterService>,
    metrics: RwLock<SystemMetrics>,
    started_at: Instant,
    sample_interval: Duration,
    probe_gpu: bool,
}

impl HealthMonitor {
    pub fn new(
        counter: Arc<TrackingCounterService>,
        sample_interval_secs: u64,
        probe_gpu: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            counter,
            metrics: RwLock::new(SystemMetrics::default()),
            started_at: Instant::now(),
            sample_interval: Duration::from_secs(sample_interval_secs),
            probe_gpu,
        })
    }

    /// Replace the current metrics sample
    pub async fn update_metrics(&self, metrics: SystemMetrics) {
        *self.metrics.write().await = metrics;
    }

    /// Start the background sampling loop
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            let mut sys = System::new_all();
            let mut ticker = tokio::time::interval(self.sample_interval);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }

                sys.refresh_all();

                let cpu = {
                    let cpus = sys.cpus();
                    if cpus.is_empty() {
                        0.0
                    } else {
                        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
                    }
                };
                let memory = if sys.total_memory() > 0 {
                    (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
                } else {
                    0.0
                };
                let disk = {
                    let disks = Disks::new_with_refreshed_list();
                    let (total, available) = disks
                        .iter()
                        .fold((0u64, 0u64), |(t, a), d| {
                            (t + d.total_space(), a + d.available_space())
                        });
                    if total > 0 {
                        ((total - available) as f32 / total as f32) * 100.0
                    } else {
                        0.0
                    }
                };
                let gpu = if self.probe_gpu { probe_gpu().await } else { None };

                self.update_metrics(SystemMetrics {
                    cpu_percent: cpu,
                    memory_percent: memory,
                    disk_percent: disk,
                    gpu,
                })
                .await;
            }
            tracing::debug!("Health sampling stopped");
        });
    }

    /// Build a health status message from the latest sample and counts
    pub async fn sample(&self) -> HealthStatus {
        let metrics = self.metrics.read().await.clone();
        let snapshots = self.counter.snapshot_all().await;
        let total_objects: u64 = snapshots.iter().map(|s| s.total_count).sum();

        let system_status =
            if metrics.cpu_percent > CPU_WARN_PERCENT || metrics.memory_percent > MEMORY_WARN_PERCENT {
                "warning"
            } else {
                "healthy"
            };

        HealthStatus {
            timestamp: Utc::now(),
            system_status: system_status.to_string(),
            cpu_usage: metrics.cpu_percent,
            memory_usage: metrics.memory_percent,
            disk_usage: metrics.disk_percent,
            gpu: metrics.gpu,
            active_streams: snapshots.len(),
            total_objects_detected: total_objects,
            uptime: self.started_at.elapsed().as_secs(),
        }
    }

    /// Build the cross-stream analytics summary
    pub async fn summarize(&self) -> AnalyticsSummary {
        let snapshots = self.counter.snapshot_all().await;

        let mut breakdown = BTreeMap::new();
        let mut total_unique = 0u64;
        let mut total_session = 0u64;
        let mut total_persistent = 0u64;
        for snapshot in &snapshots {
            total_unique += snapshot.live_count;
            total_session += snapshot.session_count;
            total_persistent += snapshot.total_count;
            breakdown.insert(
                snapshot.stream_id.clone(),
                StreamBreakdown {
                    unique: snapshot.live_count,
                    session: snapshot.session_count,
                    total: snapshot.total_count,
                },
            );
        }

        AnalyticsSummary {
            timestamp: Utc::now(),
            counting_method: COUNTING_METHOD,
            total_unique_objects_tracked: total_unique,
            total_session_new_objects: total_session,
            total_persistent_count: total_persistent,
            active_streams: snapshots.len(),
            per_stream_breakdown: breakdown,
        }
    }
}

/// Query GPU utilization via nvidia-smi, best-effort
async fn probe_gpu() -> Option<GpuInfo> {
    let output = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::process::Command::new("nvidia-smi")
            .args([
                "--query-gpu=utilization.gpu,memory.used,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let fields: Vec<&str> = stdout.trim().lines().next()?.split(',').collect();
    if fields.len() < 3 {
        return None;
    }

    Some(GpuInfo {
        utilization_percent: fields[0].trim().parse().ok()?,
        memory_used_mb: fields[1].trim().parse().ok()?,
        memory_total_mb: fields[2].trim().parse().ok()?,
    })
}
