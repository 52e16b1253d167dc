//! Application state for Axum handlers.

use boxoffice_runtime::{MetricsServer, Orchestrator, Reconciler};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone: the orchestrator and reconciler share their collaborators.
#[derive(Clone)]
pub struct AppState {
    /// Facade over both machines
    pub orchestrator: Orchestrator,
    /// Invoice webhook handling
    pub reconciler: Reconciler,
    /// Prometheus recorder, when installed
    pub metrics: Option<Arc<MetricsServer>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(orchestrator: Orchestrator, reconciler: Reconciler) -> Self {
        Self {
            orchestrator,
            reconciler,
            metrics: None,
        }
    }

    /// Serve metrics from `server` on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, server: Arc<MetricsServer>) -> Self {
        self.metrics = Some(server);
        self
    }
}
