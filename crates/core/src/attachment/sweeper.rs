//! Periodic reclamation of expired TEMP uploads.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::lifecycle::{AttachmentLifecycle, ReleaseReport};
use super::store::AttachmentStore;
use crate::storage::BlobGateway;

/// Shortest interval the loop accepts.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a single sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing had expired.
    Idle,
    /// Another sweep was still running.
    Skipped,
    /// The expired lookup failed.
    Failed(String),
    /// Expired uploads were released.
    Released(ReleaseReport),
}

/// Handle to a running sweep loop.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for any in-flight sweep to finish.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).await.is_err() {
            debug!("Sweeper loop already stopped");
        }
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweeper loop terminated abnormally");
        }
    }
}

/// Expiration sweeper.
///
/// At most one sweep runs at a time per instance. Running several instances
/// against one store is safe but wasteful: both may release the same rows and
/// the release is idempotent.
pub struct ExpirationSweeper<S, B, C> {
    lifecycle: AttachmentLifecycle<S, B, C>,
    running: Arc<AtomicBool>,
}

impl<S, B, C> Clone for ExpirationSweeper<S, B, C> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

impl<S, B, C> ExpirationSweeper<S, B, C>
where
    S: AttachmentStore,
    B: BlobGateway,
    C: Clock,
{
    /// Create a new sweeper.
    #[must_use]
    pub fn new(lifecycle: AttachmentLifecycle<S, B, C>) -> Self {
        Self {
            lifecycle,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a sweep is currently in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Release every TEMP upload that expired before the clock's "now".
    ///
    /// Returns [`SweepOutcome::Skipped`] without doing anything while another
    /// sweep on this instance is in progress.
    pub async fn run_once(&self) -> SweepOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            info!("Sweep already in progress, skipping");
            return SweepOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let now = self.lifecycle.now();
        let expired = match self.lifecycle.expired_temp(now).await {
            Ok(expired) => expired,
            Err(e) => {
                error!(error = %e, "Failed to look up expired attachments");
                return SweepOutcome::Failed(e.to_string());
            }
        };

        if expired.is_empty() {
            debug!("No expired attachments");
            return SweepOutcome::Idle;
        }

        info!(count = expired.len(), "Reclaiming expired attachments");
        SweepOutcome::Released(self.lifecycle.reclaim_batch(expired).await)
    }

    /// Sweep every `interval`, starting immediately.
    ///
    /// A tick that arrives while the previous sweep is still running is
    /// dropped. A sweep that panics is logged and the loop keeps going.
    /// Dropping the handle without calling
    /// [`shutdown`](SweeperHandle::shutdown) also stops the loop.
    pub fn start(&self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = self.clone();
        let task = tokio::spawn(async move { sweeper.run_loop(interval, shutdown_rx).await });

        SweeperHandle { shutdown_tx, task }
    }

    async fn run_loop(&self, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        let interval = interval.max(MIN_INTERVAL);
        info!(interval_secs = interval.as_secs(), "Expiration sweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        warn!("Previous sweep still running, skipping tick");
                        continue;
                    }
                    in_flight = Some(self.spawn_sweep());
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!(error = %e, "In-flight sweep ended abnormally during shutdown");
            }
        }
        info!("Expiration sweeper stopped");
    }

    /// Run one sweep on its own task. A panic is caught there and logged.
    fn spawn_sweep(&self) -> JoinHandle<()> {
        let sweeper = self.clone();
        tokio::spawn(async move {
            match AssertUnwindSafe(sweeper.run_once()).catch_unwind().await {
                Ok(outcome) => log_outcome(&outcome),
                Err(_) => error!("Sweep panicked, retrying on next tick"),
            }
        })
    }
}

fn log_outcome(outcome: &SweepOutcome) {
    match outcome {
        SweepOutcome::Released(report) if report.row_delete_failed => warn!(
            requested = report.requested,
            "Sweep could not remove expired records, retrying on next tick"
        ),
        SweepOutcome::Released(report) => debug!(
            rows_deleted = report.rows_deleted,
            rows_retained = report.rows_retained,
            blobs_failed = report.blobs_failed,
            "Sweep finished"
        ),
        SweepOutcome::Idle | SweepOutcome::Skipped | SweepOutcome::Failed(_) => {}
    }
}

/// Clears the running flag on every exit path, unwinding included.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
