//! Core data model.
//!
//! A job is a unit of deferred work: a type tag, a JSON payload, and
//! delivery metadata (attempts, backoff gate, claim ownership). The typed
//! payload layer at the bottom of this module is the only place the raw
//! wire shapes are interpreted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, assigned at enqueue time. Immutable.
    pub id: JobId,

    /// Type tag selecting dispatch behavior (e.g. "send-welcome-email").
    pub job_type: String,

    /// Payload specific to `job_type`. The queue doesn't interpret this.
    pub payload: serde_json::Value,

    /// Current lifecycle status.
    pub status: Status,

    /// Processing attempts so far. Incremented by claim, monotonic.
    pub attempts: u32,

    /// Retry budget, resolved at enqueue time.
    pub max_attempts: u32,

    /// Worker currently holding this job, while in-flight.
    pub claimed_by: Option<String>,

    /// Visibility deadline: after this instant an unacknowledged claim is
    /// reclaimable by the queue.
    pub claim_expires_at: Option<DateTime<Utc>>,

    /// Earliest instant the job may be claimed (retry backoff / delay).
    pub not_before: DateTime<Utc>,

    /// Most recent failure, recorded for audit.
    pub last_error: Option<String>,

    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Waiting for a worker (or backing off between retries).
    Pending,
    /// Exclusively claimed by one worker.
    InFlight,
    /// Delivered successfully. Terminal.
    Completed,
    /// Retry budget exhausted or permanently unprocessable. Terminal.
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::InFlight => "in-flight",
            Status::Completed => "completed",
            Status::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "in-flight" => Ok(Status::InFlight),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new jobs. The queue's producer-facing API.
pub struct NewJob {
    pub(crate) job_type: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) delay: Option<Duration>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            max_attempts: None,
            delay: None,
        }
    }

    /// Onboarding email for a newly registered user.
    pub fn welcome_email(payload: &WelcomePayload) -> crate::error::Result<Self> {
        Ok(Self::new(WELCOME_EMAIL, serde_json::to_value(payload)?))
    }

    /// Branded notification email with caller-supplied subject and body.
    pub fn generic_email(payload: &GenericPayload) -> crate::error::Result<Self> {
        Ok(Self::new(GENERIC_EMAIL, serde_json::to_value(payload)?))
    }

    /// Override the queue's default retry budget for this job.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    /// Delay before the job becomes claimable.
    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Job type tag for the fixed onboarding email.
pub const WELCOME_EMAIL: &str = "send-welcome-email";

/// Job type tag for the branded generic email.
pub const GENERIC_EMAIL: &str = "send-generic-email";

/// Wire payload of a `send-welcome-email` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WelcomePayload {
    pub name: String,
    pub email: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Wire payload of a `send-generic-email` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericPayload {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<GenericOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericOptions {
    /// Overrides merged over the company defaults when rendering.
    #[serde(rename = "templateData", default, skip_serializing_if = "Option::is_none")]
    pub template_data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A job payload interpreted at the worker boundary.
///
/// The match over this enum is exhaustive: a type tag the worker doesn't
/// recognize lands in `Unrecognized` and is failed permanently rather than
/// falling through to the generic template with fields that may not exist.
#[derive(Debug, Clone)]
pub enum EmailTask {
    Welcome(WelcomePayload),
    Generic(GenericPayload),
    Unrecognized { job_type: String },
}

impl EmailTask {
    /// Parse a job's payload according to its type tag.
    ///
    /// A malformed payload for a known type is an error (permanently
    /// unprocessable); an unknown type parses to `Unrecognized`.
    pub fn from_job(job: &Job) -> crate::error::Result<Self> {
        match job.job_type.as_str() {
            WELCOME_EMAIL => {
                let payload: WelcomePayload = serde_json::from_value(job.payload.clone())
                    .map_err(|e| {
                        crate::error::Error::Payload(format!("{WELCOME_EMAIL}: {e}"))
                    })?;
                Ok(EmailTask::Welcome(payload))
            }
            GENERIC_EMAIL => {
                let payload: GenericPayload = serde_json::from_value(job.payload.clone())
                    .map_err(|e| {
                        crate::error::Error::Payload(format!("{GENERIC_EMAIL}: {e}"))
                    })?;
                Ok(EmailTask::Generic(payload))
            }
            other => Ok(EmailTask::Unrecognized {
                job_type: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with(job_type: &str, payload: serde_json::Value) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            job_type: job_type.to_string(),
            payload,
            status: Status::Pending,
            attempts: 0,
            max_attempts: 3,
            claimed_by: None,
            claim_expires_at: None,
            not_before: now,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
        }
    }

    #[test]
    fn status_round_trips_through_display() {
        for status in [
            Status::Pending,
            Status::InFlight,
            Status::Completed,
            Status::Failed,
        ] {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn welcome_payload_uses_camel_case_user_id_on_the_wire() {
        let payload = WelcomePayload {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            user_id: "u1".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"name": "Ana", "email": "ana@example.com", "userId": "u1"})
        );
    }

    #[test]
    fn welcome_job_parses_to_welcome_task() {
        let job = job_with(
            WELCOME_EMAIL,
            json!({"name": "Ana", "email": "ana@example.com", "userId": "u1"}),
        );
        match EmailTask::from_job(&job).unwrap() {
            EmailTask::Welcome(p) => {
                assert_eq!(p.email, "ana@example.com");
                assert_eq!(p.user_id, "u1");
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    #[test]
    fn generic_job_parses_with_template_data() {
        let job = job_with(
            GENERIC_EMAIL,
            json!({
                "to": "user@example.com",
                "subject": "Alert",
                "text": "A new threat was reported near you.",
                "options": {"templateData": {"name": "SafeSpace Alerts"}}
            }),
        );
        match EmailTask::from_job(&job).unwrap() {
            EmailTask::Generic(p) => {
                let data = p.options.unwrap().template_data.unwrap();
                assert_eq!(data["name"], json!("SafeSpace Alerts"));
            }
            other => panic!("expected Generic, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_is_a_payload_error() {
        let job = job_with(WELCOME_EMAIL, json!({"name": "Ana"}));
        let err = EmailTask::from_job(&job).unwrap_err();
        assert!(matches!(err, crate::error::Error::Payload(_)));
    }

    #[test]
    fn unknown_type_parses_to_unrecognized() {
        let job = job_with("send-carrier-pigeon", json!({}));
        match EmailTask::from_job(&job).unwrap() {
            EmailTask::Unrecognized { job_type } => {
                assert_eq!(job_type, "send-carrier-pigeon");
            }
            other => panic!("expected Unrecognized, got {other:?}"),
        }
    }
}
