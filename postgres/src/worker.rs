//! Polling worker that drives the job queue.
//!
//! Each tick leases a batch of due jobs, hands them to a [`JobHandler`] and
//! settles every delivery according to the [`RetryPolicy`]: done, redeliver
//! later, or dead-letter.

use crate::job_queue::PgJobQueue;
use boxoffice_core::job::{Job, JobError, JobHandler, SchedulerError};
use boxoffice_runtime::retry::{RetryDecision, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Tallies of one [`JobWorker::run_once`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs the handler accepted or discarded
    pub completed: usize,
    /// Jobs put back for redelivery
    pub retried: usize,
    /// Jobs moved to the dead-letter table
    pub dead_lettered: usize,
}

impl WorkerStats {
    /// Jobs handled in the pass
    #[must_use]
    pub const fn total(&self) -> usize {
        self.completed + self.retried + self.dead_lettered
    }
}

/// Job queue worker.
///
/// # Example
///
/// ```ignore
/// let (mut worker, shutdown) =
///     JobWorker::new(queue, Arc::new(dispatcher), RetryPolicy::default());
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.send(true).ok();
/// });
///
/// worker.start().await;
/// ```
pub struct JobWorker {
    queue: PgJobQueue,
    handler: Arc<dyn JobHandler>,
    policy: RetryPolicy,
    batch_size: usize,
    lease: Duration,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl JobWorker {
    /// Create a worker and its shutdown sender. Send `true` to stop it.
    #[must_use]
    pub fn new(
        queue: PgJobQueue,
        handler: Arc<dyn JobHandler>,
        policy: RetryPolicy,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Self {
            queue,
            handler,
            policy,
            batch_size: 32,
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            shutdown: shutdown_rx,
        };
        (worker, shutdown_tx)
    }

    /// Jobs leased per tick.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// How long a leased job stays hidden from other workers.
    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Pause between ticks that found nothing to do.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Lease one batch of due jobs and deliver them in due order.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the queue cannot be reached. Jobs already
    /// leased stay hidden until their lease expires and are then redelivered.
    pub async fn run_once(&self) -> Result<WorkerStats, SchedulerError> {
        let jobs = self.queue.claim_due(self.batch_size, self.lease).await?;
        let mut stats = WorkerStats::default();
        for job in jobs {
            self.deliver(job, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn deliver(&self, job: Job, stats: &mut WorkerStats) -> Result<(), SchedulerError> {
        let id = job.id;
        let attempts = job.attempts;
        match self.handler.handle(job.clone()).await {
            Ok(outcome) => {
                tracing::debug!(job = %job.key, ?outcome, "Job delivered");
                self.queue.complete(id).await?;
                stats.completed += 1;
            },
            Err(error) => {
                let message = error.to_string();
                match self.policy.decide(attempts, &error) {
                    RetryDecision::Redeliver(delay) => {
                        tracing::warn!(
                            job = %job.key,
                            attempts = attempts + 1,
                            ?delay,
                            error = %message,
                            "Job failed, will retry"
                        );
                        self.queue.retry(id, delay, &message).await?;
                        stats.retried += 1;
                    },
                    RetryDecision::DeadLetter => {
                        if matches!(error, JobError::Fatal(_)) {
                            tracing::error!(
                                job = %job.key,
                                error = %message,
                                "Job failed permanently"
                            );
                        }
                        self.queue.dead_letter(&job, &message).await?;
                        stats.dead_lettered += 1;
                    },
                }
            },
        }
        Ok(())
    }

    /// Deliver jobs until the shutdown signal flips to `true`.
    ///
    /// Queue errors are logged and retried on the next tick.
    pub async fn start(&mut self) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval = ?self.poll_interval,
            "Starting job worker"
        );

        while !*self.shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(stats) => stats.total() == 0,
                Err(e) => {
                    tracing::error!(error = %e, "Job worker tick failed");
                    true
                },
            };
            if !idle {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {},
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                },
            }
        }

        tracing::info!("Job worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_total_counts_every_disposition() {
        let stats = WorkerStats {
            completed: 3,
            retried: 1,
            dead_lettered: 2,
        };
        assert_eq!(stats.total(), 6);
        assert_eq!(WorkerStats::default().total(), 0);
    }
}
