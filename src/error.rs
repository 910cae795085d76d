//! Error types for mailq.

use thiserror::Error;

use crate::model::{JobId, Status};

#[derive(Debug, Error)]
pub enum Error {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {id} is not in-flight (status: {status})")]
    NotInFlight { id: JobId, status: Status },

    #[error("job {id} is claimed by {owner:?}, not {caller}")]
    NotOwner {
        id: JobId,
        owner: Option<String>,
        caller: String,
    },

    #[error("invalid job payload: {0}")]
    Payload(String),

    #[error("storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Mail(#[from] crate::mail::MailError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
