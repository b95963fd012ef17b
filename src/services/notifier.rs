//! Outbound email notifications.
//!
//! Mail goes out through an SMTP relay when one is configured, otherwise it is
//! only written to the log.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::info;
use std::time::Duration;

use crate::config::{SmtpSettings, SmtpTls};

#[derive(Debug)]
pub enum NotifierError {
    /// Bad sender or recipient address, or an unbuildable message.
    Message(String),
    Transport(String),
}

impl core::fmt::Display for NotifierError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NotifierError::Message(s) => write!(f, "invalid message: {}", s),
            NotifierError::Transport(s) => write!(f, "smtp delivery failed: {}", s),
        }
    }
}

impl std::error::Error for NotifierError {}

pub trait Notifier: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifierError>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifierError> {
        info!("[EMAIL] to={} subject={:?} ({} bytes, log-only)", to, subject, body.len());
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifierError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| NotifierError::Message(format!("{:?}: {}", address, e)))
}

fn build_message(from: &Mailbox, to: &str, subject: &str, body: &str) -> Result<Message, NotifierError> {
    Message::builder()
        .from(from.clone())
        .to(parse_mailbox(to)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| NotifierError::Message(e.to_string()))
}

/// Plain-text mail over an authenticated SMTP relay (blocking transport).
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings, from: &str, timeout: Duration) -> Result<Self, NotifierError> {
        let builder = match settings.tls {
            SmtpTls::Implicit => SmtpTransport::relay(&settings.server),
            SmtpTls::StartTls => SmtpTransport::starttls_relay(&settings.server),
        }
        .map_err(|e| NotifierError::Transport(e.to_string()))?;
        let mailer = builder
            .port(settings.port)
            .credentials(Credentials::new(settings.username.clone(), settings.password.clone()))
            .timeout(Some(timeout))
            .build();
        Ok(SmtpNotifier {
            mailer,
            from: parse_mailbox(from)?,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifierError> {
        let message = build_message(&self.from, to, subject, body)?;
        self.mailer
            .send(&message)
            .map(|_| ())
            .map_err(|e| NotifierError::Transport(e.to_string()))
    }
}
