//! `PostgreSQL` adapters for the boxoffice engine.
//!
//! Implements the collaborator traits from `boxoffice-core` on top of sqlx:
//!
//! - [`PgSnapshotStore`]: versioned JSONB snapshots with compare-and-set saves
//!   and an atomic seat claim
//! - [`PgLedger`]: append-only transaction ledger, unique per reference and direction
//! - [`PgEventLog`]: show activity log
//! - [`PgJobQueue`]: durable job scheduler with leased claims
//! - [`DeadJobQueue`]: jobs that could not be delivered
//! - [`JobWorker`]: polling loop that feeds due jobs to a handler
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_postgres::PostgresBackend;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = PostgresBackend::connect("postgres://localhost/boxoffice", 10).await?;
//!     backend.migrate().await?;
//!     let store = backend.snapshot_store();
//!     Ok(())
//! }
//! ```

pub mod dead_letter_queue;
pub mod event_log;
pub mod job_queue;
pub mod ledger;
pub mod snapshot_store;
pub mod worker;

pub use dead_letter_queue::{DeadJob, DeadJobQueue, DeadJobStatus};
pub use event_log::PgEventLog;
pub use job_queue::PgJobQueue;
pub use ledger::PgLedger;
pub use snapshot_store::PgSnapshotStore;
pub use worker::{JobWorker, WorkerStats};

use boxoffice_core::persistence::PersistenceError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Shared connection pool with constructors for every adapter
#[derive(Clone, Debug)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::DatabaseError(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create or upgrade the schema.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Snapshot store on this pool
    #[must_use]
    pub fn snapshot_store(&self) -> PgSnapshotStore {
        PgSnapshotStore::new(self.pool.clone())
    }

    /// Ledger on this pool
    #[must_use]
    pub fn ledger(&self) -> PgLedger {
        PgLedger::new(self.pool.clone())
    }

    /// Event log on this pool
    #[must_use]
    pub fn event_log(&self) -> PgEventLog {
        PgEventLog::new(self.pool.clone())
    }

    /// Job queue on this pool
    #[must_use]
    pub fn job_queue(&self) -> PgJobQueue {
        PgJobQueue::new(self.pool.clone())
    }

    /// Dead Letter Queue on this pool
    #[must_use]
    pub fn dead_jobs(&self) -> DeadJobQueue {
        DeadJobQueue::new(self.pool.clone())
    }
}
