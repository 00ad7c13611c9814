//! countstream - Tracking-Based Object Counting & Telemetry Engine
//!
//! Main entry point: wires the components together, runs them until a
//! termination signal or fatal failure, then flushes and exits with the
//! code the supervisor contract expects (0 clean stop, non-zero fault).

use countstream::count_store::{CountStore, FlushService};
use countstream::counter_service::TrackingCounterService;
use countstream::health_monitor::HealthMonitor;
use countstream::ingest::{self, simulator::SimulationFeed, IngestService};
use countstream::state::{AppConfig, AppState, EngineState, ShutdownReason};
use countstream::telemetry::publisher::{MqttPublisher, TelemetrySink};
use countstream::telemetry::TelemetryScheduler;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "countstream=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting countstream v{}", env!("CARGO_PKG_VERSION"));

    let mut engine_state = EngineState::Initializing;
    tracing::info!(state = %engine_state, "Engine state");

    // Load configuration
    let config = AppConfig::from_env();
    tracing::info!(
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        streams = config.streams.len(),
        confidence_threshold = config.confidence_threshold,
        eviction_window_secs = config.eviction_window_secs,
        persistence_path = %config.persistence_path.display(),
        simulate = config.simulate,
        "Configuration loaded"
    );

    // Fatal-failure channel and cooperative stop signal for all tasks
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<ShutdownReason>(4);
    let (stop_tx, stop_rx) = watch::channel(false);

    // Load persisted counts (fail-soft) and seed counter state
    let store = Arc::new(CountStore::new(config.persistence_path.clone()));
    let persisted = store.load().await;

    let mut counter = TrackingCounterService::new(config.confidence_threshold);
    for stream in &config.streams {
        if let Some(threshold) = stream.confidence_threshold {
            counter = counter.with_stream_threshold(&stream.stream_id, threshold);
        }
    }
    let counter = Arc::new(counter);
    counter
        .register_streams(config.streams.iter().map(|s| s.stream_id.clone()))
        .await;
    counter
        .restore_totals(
            persisted
                .iter()
                .map(|(id, record)| (id.clone(), record.total_count))
                .collect(),
        )
        .await;
    tracing::info!(streams = config.streams.len(), "Counter state initialized");

    // Batched persistence writer
    let flush = Arc::new(FlushService::new(
        store.clone(),
        counter.clone(),
        Duration::from_millis(config.flush_debounce_ms),
        config.persistence_failure_budget,
        shutdown_tx.clone(),
    ));
    flush.clone().start(stop_rx.clone()).await;

    // Broker connection
    let publisher = MqttPublisher::start(&config.broker, stop_rx.clone());

    // System metrics sampling
    let health = HealthMonitor::new(
        counter.clone(),
        config.health_sample_interval_secs,
        config.gpu_probe_enabled,
    );
    health.clone().start(stop_rx.clone());

    let state = AppState {
        config: config.clone(),
        counter: counter.clone(),
        store,
        flush: flush.clone(),
        publisher: publisher.clone(),
        health: health.clone(),
    };

    // Event intake (single writer of counter state)
    let (event_sender, event_rx) = ingest::event_channel(config.event_queue_capacity);
    IngestService::new(counter.clone(), flush).start(event_rx, stop_rx.clone());

    // Eviction pass, independent of event arrival
    {
        let counter = counter.clone();
        let mut stop = stop_rx.clone();
        let window = chrono::Duration::seconds(config.eviction_window_secs as i64);
        let interval = Duration::from_secs(config.eviction_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        counter.evict_stale(Utc::now(), window).await;
                    }
                }
            }
        });
    }

    // Telemetry publishing
    let scheduler = Arc::new(TelemetryScheduler::new(
        counter.clone(),
        health,
        publisher.clone() as Arc<dyn TelemetrySink>,
        config.streams.clone(),
        config.health_topic.clone(),
        config.analytics_topic.clone(),
        config.intervals.clone(),
    ));
    scheduler.start(stop_rx.clone()).await;

    // Synthetic feed when no vision pipeline is attached
    if config.simulate {
        let stream_ids = config.streams.iter().map(|s| s.stream_id.clone()).collect();
        SimulationFeed::new(event_sender.clone(), stream_ids).start(stop_rx.clone());
    }

    engine_state = EngineState::Running;
    tracing::info!(state = %engine_state, "Engine running");

    // Wait for a termination signal or a fatal failure
    let mut sigterm = signal(SignalKind::terminate())?;
    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
            ShutdownReason::Signal
        }
        _ = sigterm.recv() => {
            tracing::info!("Termination signal received");
            ShutdownReason::Signal
        }
        maybe_reason = shutdown_rx.recv() => {
            maybe_reason.unwrap_or(ShutdownReason::Signal)
        }
    };

    engine_state = EngineState::ShuttingDown;
    tracing::info!(state = %engine_state, reason = ?reason, "Engine shutting down");

    // Stop intake, timers and the broker event loop
    let _ = stop_tx.send(true);

    // Final flush with a bounded deadline
    let deadline = Duration::from_secs(state.config.shutdown_flush_timeout_secs);
    match tokio::time::timeout(deadline, state.flush.flush_once()).await {
        Ok(Ok(())) => tracing::info!("Final counts flushed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Final flush failed"),
        Err(_) => tracing::warn!("Final flush deadline exceeded"),
    }

    state.publisher.disconnect().await;

    engine_state = EngineState::Terminated;
    tracing::info!(state = %engine_state, "Engine stopped");

    match reason {
        ShutdownReason::Signal => Ok(()),
        ShutdownReason::Fatal(message) => {
            tracing::error!(reason = %message, "Exiting with fault");
            std::process::exit(1);
        }
    }
}
