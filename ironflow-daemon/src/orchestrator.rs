//! Daemon orchestration -- pipeline assembly, record sink and lifecycle.
//!
//! The [`Orchestrator`] is the central coordinator of `ironflow-daemon`.
//! It validates configuration, installs the metrics recorder, builds the
//! flow pipeline, wires its outgoing queue into the record sink and runs
//! until a shutdown signal arrives.
//!
//! # Shutdown Order
//!
//! 1. Flow pipeline (stop receiving, drain intake queues, close outgoing queue)
//! 2. Record sink (write remaining records, exits when the queue is closed)
//! 3. Background tasks (uptime updater)

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use ironflow_core::config::IronflowConfig;
use ironflow_core::metrics as m;
use ironflow_core::pipeline::Pipeline;
use ironflow_core::types::FlowMessage;
use ironflow_flow_pipeline::{FlowPipeline, FlowPipelineBuilder, PipelineConfig};

use crate::health::{DaemonHealth, log_health};
use crate::{metrics_server, sink};

/// Interval between periodic health reports in the main loop.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: IronflowConfig,
    /// The flow pipeline.
    pipeline: FlowPipeline,
    /// Outgoing record stream, handed to the sink on start.
    records: Option<mpsc::Receiver<FlowMessage>>,
    /// Running record sink.
    sink_task: Option<JoinHandle<std::io::Result<u64>>>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Background tasks stopped via `shutdown_tx`.
    background: Vec<JoinHandle<()>>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read, parsed
    /// or validated, or if the pipeline cannot be built.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = IronflowConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// Useful for testing or when config has already been loaded.
    pub async fn build_from_config(config: IronflowConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let pipeline_config = PipelineConfig::from_core(&config.flow)
            .map_err(|e| anyhow::anyhow!("invalid flow configuration: {}", e))?;

        // Install metrics recorder before the pipeline emits anything
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let input_count = pipeline_config.inputs.len();
        let (pipeline, records) = FlowPipelineBuilder::new()
            .config(pipeline_config)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build flow pipeline: {}", e))?;

        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(inputs = input_count, "orchestrator initialized");

        if config.metrics.enabled {
            record_daemon_metrics(input_count);
        }

        Ok(Self {
            config,
            pipeline,
            records: Some(records),
            sink_task: None,
            shutdown_tx,
            background: Vec::new(),
            start_time: Instant::now(),
        })
    }

    /// Start the pipeline and the record sink writing to `writer`.
    ///
    /// # Errors
    ///
    /// Fails if any input socket cannot be bound; nothing is left running.
    pub async fn start<W>(&mut self, writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(records) = self.records.take() else {
            return Err(anyhow::anyhow!("orchestrator already started"));
        };

        self.pipeline
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start flow pipeline: {}", e))?;

        self.sink_task = Some(tokio::spawn(async move {
            let mut writer = tokio::io::BufWriter::new(writer);
            let result = sink::write_records(records, &mut writer).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "record sink failed");
            }
            result
        }));

        if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.background
                .push(spawn_uptime_updater(self.start_time, shutdown_rx));
        }

        for addr in self.pipeline.local_addrs() {
            tracing::info!(listen = %addr, "listening for flow datagrams");
        }
        Ok(())
    }

    /// Start with stdout as the record sink and run until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.start(tokio::io::stdout()).await?;

        let shutdown = wait_for_shutdown_signal();
        tokio::pin!(shutdown);

        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        health_interval.tick().await;

        tracing::info!("entering main event loop");
        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal?,
                _ = health_interval.tick() => log_health(&self.health().await),
            }
        };
        tracing::info!(signal = signal, "shutdown signal received");

        let written = self.shutdown().await?;
        tracing::info!(records = written, "ironflow-daemon shut down");
        Ok(())
    }

    /// Stop the pipeline, wait for the sink to drain and stop background tasks.
    ///
    /// Returns the number of records the sink wrote.
    pub async fn shutdown(&mut self) -> Result<u64> {
        tracing::info!("stopping flow pipeline");
        let stop_result = self.pipeline.stop().await;

        // The sink ends once the pipeline has closed the outgoing queue.
        let written = match self.sink_task.take() {
            Some(task) => task
                .await
                .map_err(|e| anyhow::anyhow!("record sink task failed: {}", e))?
                .map_err(|e| anyhow::anyhow!("record sink failed: {}", e))?,
            None => 0,
        };

        tracing::debug!("broadcasting shutdown signal to background tasks");
        let _ = self.shutdown_tx.send(());
        for task in self.background.drain(..) {
            let _ = task.await;
        }

        stop_result.map_err(|e| anyhow::anyhow!("failed to stop flow pipeline: {}", e))?;
        Ok(written)
    }

    /// Build a health report from the pipeline state and counters.
    pub async fn health(&self) -> DaemonHealth {
        DaemonHealth {
            status: self.pipeline.health_check().await,
            state: self.pipeline.state_name().to_owned(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            outgoing_len: self.pipeline.outgoing_len(),
            stats: self.pipeline.stats().snapshot(),
        }
    }

    /// Addresses the inputs are bound to (empty before start).
    pub fn local_addrs(&self) -> &[SocketAddr] {
        self.pipeline.local_addrs()
    }

    /// The flow pipeline.
    pub fn pipeline(&self) -> &FlowPipeline {
        &self.pipeline
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &IronflowConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Record daemon-level metrics.
///
/// Called once during orchestrator initialization.
fn record_daemon_metrics(input_count: usize) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_INPUTS_CONFIGURED).set(input_count as f64);

    tracing::debug!(
        input_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
