//! Background housekeeping for idempotency stores.
//!
//! A sweep only bounds memory growth. Every store enforces expiry on read
//! and on claim, so the sweep period has no effect on deduplication.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::store::{IdempotencyStore, StoreResult};

/// Default sweep interval (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Sweeper lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SweepError {
    #[error("sweep interval must be greater than zero")]
    InvalidInterval,

    #[error("sweep task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("sweep task did not stop within {timeout_ms}ms and was aborted")]
    ShutdownTimedOut { timeout_ms: u64 },
}

impl SweepError {
    pub fn task_failed(reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            reason: reason.into(),
        }
    }
}

/// Run a single sweep pass.
///
/// # Errors
///
/// Returns the store's error if the sweep could not complete.
pub async fn sweep_once(store: &dyn IdempotencyStore) -> StoreResult<usize> {
    let removed = store.sweep().await?;
    if removed > 0 {
        info!(removed, "Swept expired idempotency records");
    } else {
        debug!("Sweep found no expired idempotency records");
    }
    Ok(removed)
}

/// Periodic sweep running on a spawned tokio task.
///
/// Stop it with [`shutdown`](Self::shutdown); dropping the handle aborts
/// the task.
#[derive(Debug)]
pub struct SweepTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl SweepTask {
    /// Start sweeping `store` every `interval`.
    ///
    /// The first pass runs one interval after start. Store errors are logged
    /// and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::InvalidInterval` for a zero interval.
    pub fn start(store: Arc<dyn IdempotencyStore>, interval: Duration) -> Result<Self, SweepError> {
        if interval.is_zero() {
            return Err(SweepError::InvalidInterval);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // First tick completes immediately

            info!(interval_ms = duration_ms(interval), "Idempotency sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sweep_once(store.as_ref()).await {
                            warn!(error = %e, "Sweep failed, will retry next interval");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping sweeper");
                        break;
                    }
                }
            }

            info!("Idempotency sweeper stopped");
        });

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
            interval,
        })
    }

    /// Configured sweep period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the background task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the sweeper and wait up to `timeout` for the task to finish.
    ///
    /// # Errors
    ///
    /// - `SweepError::ShutdownTimedOut` if the task had to be aborted.
    /// - `SweepError::TaskFailed` if the task panicked.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), SweepError> {
        if let Err(e) = self.shutdown_tx.send(()).await {
            debug!(error = ?e, "Sweeper channel already closed");
        }

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = ?e, "Sweep task panicked");
                Err(SweepError::task_failed(e.to_string()))
            }
            Err(_) => {
                warn!("Sweeper shutdown timeout, aborting task");
                abort.abort();
                Err(SweepError::ShutdownTimedOut {
                    timeout_ms: duration_ms(timeout),
                })
            }
        }
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
