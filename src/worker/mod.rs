//! Email dispatch worker: a bounded pool of claim→process→ack/fail slots
//! plus a background reaper for visibility timeouts and retention.
//!
//! Delivery is at-least-once: if a send succeeds but the process dies
//! before acking, the visibility timeout returns the job to the queue and
//! the email goes out again. Producers and recipients must tolerate the
//! occasional duplicate; the queue never drops a job short of permanent
//! failure.

pub mod observer;

pub use observer::{DispatchObserver, LogObserver};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::Result;
use crate::mail::{Branding, Mailer, template};
use crate::model::{EmailTask, Job};

/// Configuration for the dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent processing slots.
    pub concurrency: usize,
    /// How long a claim stays exclusive before the reaper may revert it.
    /// Must comfortably exceed the SMTP timeout.
    pub visibility_timeout: Duration,
    /// Base delay between empty polls; stretches during idle streaks.
    pub poll_interval: Duration,
    /// How often the reaper sweeps for expired claims.
    pub reap_interval: Duration,
    /// Terminal jobs older than this are purged. None disables purging.
    pub retention: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            visibility_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            reap_interval: Duration::from_secs(30),
            retention: Some(Duration::from_secs(30 * 24 * 60 * 60)),
        }
    }
}

/// The dispatch worker. Claims email jobs, renders them, and sends them
/// over the injected [`Mailer`].
#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<Db>,
    mailer: Arc<dyn Mailer>,
    observer: Arc<dyn DispatchObserver>,
    branding: Branding,
    config: DispatchConfig,
    worker_id: String,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Db>,
        mailer: Arc<dyn Mailer>,
        branding: Branding,
        config: DispatchConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            db,
            mailer,
            observer: Arc::new(LogObserver),
            branding,
            config,
            worker_id: format!("mailq-{}", &Uuid::new_v4().to_string()[..8]),
            shutdown_tx,
        }
    }

    /// Replace the default logging observer.
    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Signal all slots and the reaper to stop after their current job.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run slots and reaper until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        info!(
            worker_id = %self.worker_id,
            concurrency = self.config.concurrency,
            "dispatch worker started"
        );

        let mut tasks = JoinSet::new();
        for slot in 0..self.config.concurrency {
            tasks.spawn(self.clone().slot_loop(slot));
        }
        tasks.spawn(self.clone().reaper_loop());

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("worker task panicked: {e}");
            }
        }

        info!(worker_id = %self.worker_id, "dispatch worker stopped");
        Ok(())
    }

    /// Claim and process at most one job. Returns whether a job was handled.
    ///
    /// Per-job failures are contained here; only queue-level errors
    /// propagate.
    pub async fn run_once(&self, claimant: &str) -> Result<bool> {
        let Some(job) = self
            .db
            .claim(claimant, None, self.config.visibility_timeout)
            .await?
        else {
            return Ok(false);
        };

        self.process(job, claimant).await;
        Ok(true)
    }

    async fn slot_loop(self, slot: usize) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let claimant = format!("{}/{slot}", self.worker_id);
        let mut idle_streak: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.run_once(&claimant).await {
                Ok(true) => idle_streak = 0,
                Ok(false) => {
                    idle_streak = idle_streak.saturating_add(1);
                    let backoff = self
                        .config
                        .poll_interval
                        .mul_f64((1.0 + f64::from(idle_streak) * 0.1).min(1.5));
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    error!(slot, error = %e, "failed to poll queue");
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        info!(%claimant, "dispatch slot stopped");
    }

    /// Execute one claimed job: interpret, render, send, retire.
    async fn process(&self, job: Job, claimant: &str) {
        let job_id = job.id;
        let job_type = job.job_type.clone();

        let task = match EmailTask::from_job(&job) {
            Ok(task) => task,
            Err(e) => {
                // Malformed payload: permanent, don't burn the retry budget.
                self.retire_failed(&job, claimant, &e.to_string(), false)
                    .await;
                return;
            }
        };

        let email = match task {
            EmailTask::Welcome(payload) => template::welcome_email(&payload, &self.branding),
            EmailTask::Generic(payload) => template::generic_email(&payload, &self.branding),
            EmailTask::Unrecognized { job_type } => {
                warn!(id = %job_id, job_type, "unrecognized job type");
                self.retire_failed(
                    &job,
                    claimant,
                    &format!("unrecognized job type: {job_type}"),
                    false,
                )
                .await;
                return;
            }
        };

        // The send happens outside any queue state; claim/ack/fail stay
        // short and bounded.
        match self.mailer.send(&email).await {
            Ok(()) => match self.db.ack(job_id, claimant).await {
                Ok(done) => {
                    info!(id = %job_id, %job_type, to = %email.to, "email sent");
                    self.observer.on_completed(&done);
                }
                Err(e) => {
                    // Sent but not acked (claim expired mid-send). The job
                    // will be redelivered; at-least-once allows the duplicate.
                    warn!(id = %job_id, error = %e, "ack failed after send; job will be redelivered");
                }
            },
            Err(e) => {
                let retryable = e.is_transient();
                self.retire_failed(&job, claimant, &e.to_string(), retryable)
                    .await;
            }
        }
    }

    async fn retire_failed(&self, job: &Job, claimant: &str, error: &str, retryable: bool) {
        match self.db.fail(job.id, claimant, error, retryable).await {
            Ok(updated) => self.observer.on_failed(&updated, error),
            Err(e) => {
                warn!(id = %job.id, error = %e, "failed to record job failure");
            }
        }
    }

    async fn reaper_loop(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(self.config.reap_interval) => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }

            match self.db.reap_expired().await {
                Ok(outcome) => {
                    if outcome.reclaimed > 0 || outcome.exhausted > 0 {
                        warn!(
                            reclaimed = outcome.reclaimed,
                            exhausted = outcome.exhausted,
                            "reclaimed expired claims"
                        );
                    }
                }
                Err(e) => error!(error = %e, "visibility sweep failed"),
            }

            if let Some(retention) = self.config.retention {
                match self.db.purge_finished(retention).await {
                    Ok(purged) if purged > 0 => {
                        info!(purged, "purged terminal jobs past retention");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "retention purge failed"),
                }
            }
        }

        info!("reaper stopped");
    }
}
