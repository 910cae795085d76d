//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The SMTP password is wrapped in secrecy::SecretString to prevent log leaks.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    /// Job store location, e.g. "sqlite://mailq.db".
    pub database_url: String,
    pub smtp: SmtpConfig,
    /// Base URL substituted into email templates (dashboard links).
    pub frontend_url: String,
    pub log_level: String,
}

#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Default sender, e.g. "SafeSpace <no-reply@safespace.in>".
    pub from: String,
    pub tls: TlsMode,
    pub timeout: Duration,
}

/// How to secure the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain connection upgraded via STARTTLS. The default.
    StartTls,
    /// Implicit TLS from the first byte.
    Tls,
    /// No encryption. Local relays and tests only.
    None,
}

impl std::str::FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "starttls" => Ok(TlsMode::StartTls),
            "tls" => Ok(TlsMode::Tls),
            "none" => Ok(TlsMode::None),
            other => Err(format!("unknown TLS mode: {other}")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required_var("DATABASE_URL")?,
            smtp: SmtpConfig::from_env()?,
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "https://safespace.in".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("SMTP_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid SMTP_PORT: {raw}")))?,
            Err(_) => 587,
        };

        let tls = match std::env::var("SMTP_TLS") {
            Ok(raw) => raw.parse().map_err(Error::Config)?,
            Err(_) => TlsMode::StartTls,
        };

        let timeout = match std::env::var("SMTP_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .map_err(|_| Error::Config(format!("invalid SMTP_TIMEOUT_SECS: {raw}")))?,
            ),
            Err(_) => Duration::from_secs(10),
        };

        Ok(Self {
            host: required_var("SMTP_HOST")?,
            port,
            username: std::env::var("SMTP_USER").ok(),
            password: std::env::var("SMTP_PASSWORD").ok().map(SecretString::from),
            from: required_var("SMTP_FROM")?,
            tls,
            timeout,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
