//! Count Store - Durable per-stream count snapshots
//!
//! ## Responsibilities
//!
//! - Load persisted counts at startup (fail-soft, never fatal)
//! - Atomically replace the snapshot file (tmp write + rename)
//! - Coalesce bursts of count changes into batched writes
//!
//! The store is the only owner of the on-disk file. A crash mid-write
//! never corrupts the previously committed snapshot.

use crate::counter_service::{StreamSnapshot, TrackingCounterService};
use crate::error::Result;
use crate::state::ShutdownReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{mpsc, watch, Mutex, Notify};

/// One durable record per stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStreamCounts {
    pub total_count: u64,
    pub session_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// Owns the persisted counts file
pub struct CountStore {
    path: PathBuf,
    /// Serializes concurrent save calls (single-writer discipline)
    writer: Mutex<()>,
}

impl CountStore {
    /// Create a store for the given snapshot file path
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted snapshot.
    ///
    /// Missing, unreadable or malformed files yield an empty map with a
    /// warning; starting with zero counts beats refusing to start.
    pub async fn load(&self) -> HashMap<String, PersistedStreamCounts> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, PersistedStreamCounts>>(&raw) {
                Ok(counts) => {
                    tracing::info!(
                        path = %self.path.display(),
                        streams = counts.len(),
                        "Loaded persisted counts"
                    );
                    counts
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Persisted counts malformed, starting from zero"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %self.path.display(),
                    "No persisted counts found, starting from zero"
                );
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read persisted counts, starting from zero"
                );
                HashMap::new()
            }
        }
    }

    /// Atomically replace the snapshot file with the given counts
    pub async fn save(&self, counts: &HashMap<String, PersistedStreamCounts>) -> Result<()> {
        let _guard = self.writer.lock().await;

        let json = serde_json::to_vec_pretty(counts)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp = PathBuf::from(format!("{}.tmp", self.path.display()));
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &self.path).await?;

        tracing::trace!(
            path = %self.path.display(),
            streams = counts.len(),
            bytes = json.len(),
            "Counts persisted"
        );
        Ok(())
    }
}

/// Project live snapshots into persistable records
pub fn to_persisted(snapshots: &[StreamSnapshot]) -> HashMap<String, PersistedStreamCounts> {
    snapshots
        .iter()
        .map(|s| {
            (
                s.stream_id.clone(),
                PersistedStreamCounts {
                    total_count: s.total_count,
                    session_count: s.session_count,
                    last_updated: s.last_updated.unwrap_or_else(Utc::now),
                },
            )
        })
        .collect()
}

/// Background writer that batches count changes into snapshot saves.
///
/// Woken by `mark_dirty` whenever a new object is counted; rapid bursts
/// coalesce into one write after a short debounce. Repeated write failures
/// beyond the budget report a fatal condition through the shutdown channel.
pub struct FlushService {
    store: Arc<CountStore>,
    counter: Arc<TrackingCounterService>,
    dirty: Notify,
    debounce: Duration,
    failure_budget: u32,
    shutdown_tx: mpsc::Sender<ShutdownReason>,
}

impl FlushService {
    pub fn new(
        store: Arc<CountStore>,
        counter: Arc<TrackingCounterService>,
        debounce: Duration,
        failure_budget: u32,
        shutdown_tx: mpsc::Sender<ShutdownReason>,
    ) -> Self {
        Self {
            store,
            counter,
            dirty: Notify::new(),
            debounce,
            failure_budget,
            shutdown_tx,
        }
    }

    /// Request a flush; cheap, callable from the event path
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Persist the latest snapshot of every stream
    pub async fn flush_once(&self) -> Result<()> {
        let snapshots = self.counter.snapshot_all().await;
        self.store.save(&to_persisted(&snapshots)).await
    }

    /// Start the background flush loop
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                tokio::select! {
                    _ = self.dirty.notified() => {}
                    _ = shutdown.changed() => break,
                }

                // Coalesce a burst of new objects into one write
                tokio::time::sleep(self.debounce).await;

                match self.flush_once().await {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        tracing::warn!(
                            error = %e,
                            failures = consecutive_failures,
                            budget = self.failure_budget,
                            "Failed to persist counts"
                        );
                        if consecutive_failures >= self.failure_budget {
                            tracing::error!(
                                failures = consecutive_failures,
                                "Persistence failure budget exhausted"
                            );
                            let _ = self
                                .shutdown_tx
                                .send(ShutdownReason::Fatal(
                                    "persistence failure budget exhausted".to_string(),
                                ))
                                .await;
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Flush service stopped");
        });
    }
}
