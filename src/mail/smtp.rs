//! Mailer trait and SMTP implementation.
//!
//! The worker only sees the [`Mailer`] capability; tests substitute a
//! recording double, production injects [`SmtpMailer`].

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use super::{Email, EmailBody, MailError};
use crate::config::{SmtpConfig, TlsMode};

/// Async email sending capability.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Send an email. The call may take seconds; callers must not hold any
    /// queue state across it.
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// SMTP-based mailer using lettre.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build a mailer from SMTP configuration.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|_| MailError::InvalidAddress(config.from.clone()))?;

        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            TlsMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| MailError::Transport(e.to_string()))?
            }
        };

        builder = builder.port(config.port).timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: Arc::new(builder.build()),
            from,
        })
    }

    fn build_message(&self, email: &Email) -> Result<Message, MailError> {
        let mut from = self.from.clone();
        if let Some(ref name) = email.from_name {
            from.name = Some(name.clone());
        }

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| MailError::InvalidAddress(email.to.clone()))?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject);

        match &email.body {
            EmailBody::Html(html) => builder
                .singlepart(SinglePart::html(html.clone()))
                .map_err(|e| MailError::Build(e.to_string())),
            EmailBody::Multipart { text, html } => builder
                .multipart(MultiPart::alternative_plain_html(
                    text.clone(),
                    html.clone(),
                ))
                .map_err(|e| MailError::Build(e.to_string())),
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = self.build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        Ok(())
    }
}
