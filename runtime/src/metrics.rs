//! Prometheus metrics for the lifecycle engine.
//!
//! Covers transitions and rejections per machine, job dispositions, webhook
//! handling, ledger writes and snapshot save conflicts.
//!
//! # Example
//!
//! ```rust,no_run
//! use boxoffice_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the Prometheus recorder. The HTTP shell serves
    /// [`Self::render`] on [`Self::addr`].
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A second installation in the same process (e.g., in tests) is logged
    /// and ignored.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics server started");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Address the scrape endpoint should listen on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "boxoffice_transitions_total",
        "Accepted transitions, labelled by machine and event"
    );
    describe_counter!(
        "boxoffice_rejections_total",
        "Events declined by a guard, labelled by machine and event"
    );
    describe_counter!(
        "boxoffice_jobs_total",
        "Delivered jobs, labelled by event and outcome"
    );
    describe_counter!(
        "boxoffice_webhooks_total",
        "Invoice webhooks received, labelled by status"
    );
    describe_counter!(
        "boxoffice_ledger_writes_total",
        "Ledger rows written, labelled by direction"
    );
    describe_counter!(
        "boxoffice_store_conflicts_total",
        "Snapshot saves that lost a compare-and-set race"
    );
    describe_histogram!(
        "boxoffice_send_duration_seconds",
        "Time taken to load, reduce, persist and run the effects of one event"
    );
}

/// Recorders for the engine's metrics.
pub struct EngineMetrics;

impl EngineMetrics {
    /// An event changed a snapshot.
    pub fn record_transition(machine: &'static str, event: &'static str, duration: Duration) {
        counter!("boxoffice_transitions_total", "machine" => machine, "event" => event)
            .increment(1);
        histogram!("boxoffice_send_duration_seconds").record(duration.as_secs_f64());
    }

    /// A guard declined an event.
    pub fn record_rejection(machine: &'static str, event: &'static str) {
        counter!("boxoffice_rejections_total", "machine" => machine, "event" => event).increment(1);
    }

    /// A save lost a compare-and-set race.
    pub fn record_conflict(machine: &'static str) {
        counter!("boxoffice_store_conflicts_total", "machine" => machine).increment(1);
    }

    /// A job was handled.
    pub fn record_job(event: &str, outcome: &'static str) {
        counter!("boxoffice_jobs_total", "event" => event.to_string(), "outcome" => outcome)
            .increment(1);
    }

    /// An invoice webhook was processed.
    pub fn record_webhook(status: &'static str) {
        counter!("boxoffice_webhooks_total", "status" => status).increment(1);
    }

    /// A ledger row was written.
    pub fn record_ledger_write(direction: &'static str) {
        counter!("boxoffice_ledger_writes_total", "direction" => direction).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_recorders_do_not_require_an_installed_exporter() {
        EngineMetrics::record_transition("show", "SHOW_STARTED", Duration::from_millis(3));
        EngineMetrics::record_rejection("ticket", "JOINED_SHOW");
        EngineMetrics::record_job("RESERVATION_TIMEOUT", "applied");
        EngineMetrics::record_ledger_write("payment");
    }
}
