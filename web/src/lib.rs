//! Axum HTTP shell for the boxoffice engine.
//!
//! The orchestrator is the functional core's only door; this crate maps HTTP
//! requests onto it and its results back onto status codes.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the id from the path and the event from the JSON body
//! 3. **Send** the event through the [`Orchestrator`](boxoffice_runtime::Orchestrator)
//! 4. **Map** the [`Outcome`](boxoffice_runtime::Outcome): accepted → 200/201,
//!    rejected → 409/422, infrastructure failure → 404/500/503
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_web::{AppState, router};
//!
//! let app = router(AppState::new(orchestrator, reconciler));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use gateway::HttpPaymentGateway;
pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .route("/shows", post(handlers::shows::create_show))
        .route("/shows/:id", get(handlers::shows::get_show))
        .route("/shows/:id/events", post(handlers::shows::send_event))
        .route("/shows/:id/can/:event", get(handlers::shows::can_transition))
        .route("/shows/:id/tickets", post(handlers::shows::reserve_ticket))
        .route("/tickets/:id", get(handlers::tickets::get_ticket))
        .route("/tickets/:id/events", post(handlers::tickets::send_event))
        .route("/tickets/:id/can/:event", get(handlers::tickets::can_transition))
        .route("/webhooks/invoices/:token", post(handlers::webhooks::invoice_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
