//! Per-outcome callbacks the dispatcher invokes after ack/fail.
//!
//! Completion and failure reporting is an injected interface rather than
//! ambient global handlers, so embedders can forward outcomes to their own
//! alerting without touching the worker loop.

use tracing::{error, info, warn};

use crate::model::{Job, Status};

/// Observes dispatch outcomes. All methods default to no-ops.
pub trait DispatchObserver: Send + Sync + 'static {
    /// The job was delivered and acked.
    fn on_completed(&self, _job: &Job) {}

    /// The job failed this attempt. `job.status` tells whether it is
    /// terminal (`failed`) or pending a retry.
    fn on_failed(&self, _job: &Job, _error: &str) {}
}

/// Default observer: logs outcomes through tracing.
pub struct LogObserver;

impl DispatchObserver for LogObserver {
    fn on_completed(&self, job: &Job) {
        info!(id = %job.id, job_type = %job.job_type, attempts = job.attempts, "job completed");
    }

    fn on_failed(&self, job: &Job, error: &str) {
        if job.status == Status::Failed {
            error!(
                id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                error,
                "job permanently failed"
            );
        } else {
            warn!(
                id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                error,
                "job failed, scheduling retry"
            );
        }
    }
}
