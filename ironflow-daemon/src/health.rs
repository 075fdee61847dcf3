//! Health reporting.
//!
//! [`DaemonHealth`] combines the pipeline's `health_check()` with its
//! counters. The orchestrator builds one on a fixed interval and logs it;
//! the log level follows the status so that degraded intervals stand out.

use serde::Serialize;

use ironflow_core::pipeline::HealthStatus;
use ironflow_flow_pipeline::StatsSnapshot;

/// Health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Pipeline health status.
    pub status: HealthStatus,
    /// Pipeline lifecycle state name.
    pub state: String,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Records waiting in the outgoing queue.
    pub outgoing_len: usize,
    /// Pipeline counters at the time of the report.
    pub stats: StatsSnapshot,
}

impl DaemonHealth {
    /// Total datagrams dropped across all inputs.
    pub fn total_dropped(&self) -> u64 {
        self.stats.dropped.iter().sum()
    }

    /// Total datagrams received across all inputs.
    pub fn total_received(&self) -> u64 {
        self.stats.received.iter().sum()
    }
}

/// Log a health report at a level matching its status.
pub fn log_health(health: &DaemonHealth) {
    let received = health.total_received();
    let dropped = health.total_dropped();
    let records = health.stats.records_decoded;

    match &health.status {
        HealthStatus::Healthy => tracing::debug!(
            uptime_secs = health.uptime_secs,
            received,
            dropped,
            records,
            outgoing_len = health.outgoing_len,
            "health check: healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            reason = %reason,
            received,
            dropped,
            outgoing_len = health.outgoing_len,
            "health check: degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            reason = %reason,
            state = %health.state,
            "health check: unhealthy"
        ),
    }
}
