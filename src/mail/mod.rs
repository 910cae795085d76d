//! Outbound email: transport capability trait, SMTP implementation, and
//! the HTML templates the dispatch worker renders.

pub mod smtp;
pub mod template;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use smtp::{Mailer, SmtpMailer};
pub use template::Branding;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Transport(String),
}

impl MailError {
    /// Transport errors (network, provider auth, rate limits) are worth
    /// retrying; a message that can't be built never will be.
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transport(_))
    }
}

/// A rendered email ready to hand to a [`Mailer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: EmailBody,
    /// Display name overriding the transport's default sender name.
    /// The sender address itself always comes from the transport config.
    pub from_name: Option<String>,
}

/// The body content of an email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmailBody {
    /// HTML only.
    Html(String),
    /// Both plain text and HTML (multipart/alternative).
    Multipart { text: String, html: String },
}

impl Email {
    pub fn html(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: EmailBody::Html(html.into()),
            from_name: None,
        }
    }

    pub fn multipart(
        to: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: EmailBody::Multipart {
                text: text.into(),
                html: html.into(),
            },
            from_name: None,
        }
    }

    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }
}
