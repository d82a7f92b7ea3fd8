//! Email delivery backends.

use crate::config::{EmailBackendKind, SmtpSettings};
use crate::metrics;
use crate::workers::HandlerError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use tracing::{debug, info};

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// Connection problems, timeouts, 4xx replies.
    #[error("email delivery failed temporarily: {0}")]
    Transient(String),

    /// 5xx replies and malformed messages.
    #[error("email delivery rejected: {0}")]
    Permanent(String),
}

impl From<EmailError> for HandlerError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::Transient(_) => HandlerError::transient(err),
            EmailError::InvalidAddress(_) | EmailError::Permanent(_) => {
                HandlerError::permanent(err)
            }
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

fn parse_mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .parse()
        .map_err(|_| EmailError::InvalidAddress(address.to_string()))
}

/// Logs messages instead of delivering them. For development.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        parse_mailbox(&message.from)?;
        parse_mailbox(&message.to)?;

        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            "Email logged (not delivered)"
        );
        debug!("Email body:\n{}", message.body);
        metrics::record_email("logged");
        Ok(())
    }
}

/// Delivers through an SMTP relay.
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let mut builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .with_context(|| format!("Invalid SMTP relay {}", settings.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        builder = builder.port(settings.port);

        match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            (None, None) => {}
            _ => return Err(anyhow!("SMTP username and password must be set together")),
        }

        info!("SMTP delivery via {}:{}", settings.host, settings.port);
        Ok(Self {
            transport: builder.build(),
        })
    }

    fn build_message(message: &EmailMessage) -> Result<Message, EmailError> {
        Message::builder()
            .from(parse_mailbox(&message.from)?)
            .to(parse_mailbox(&message.to)?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| EmailError::Permanent(e.to_string()))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let email = Self::build_message(message)?;

        match self.transport.send(email).await {
            Ok(_) => {
                metrics::record_email("sent");
                info!(to = %message.to, "Email delivered");
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                metrics::record_email("rejected");
                Err(EmailError::Permanent(e.to_string()))
            }
            Err(e) => {
                metrics::record_email("error");
                Err(EmailError::Transient(e.to_string()))
            }
        }
    }
}

/// Build the configured email backend.
pub fn create_email_sender(
    kind: EmailBackendKind,
    smtp: Option<&SmtpSettings>,
) -> Result<Arc<dyn EmailSender>> {
    match kind {
        EmailBackendKind::Log => Ok(Arc::new(LogEmailSender)),
        EmailBackendKind::Smtp => {
            let settings = smtp.context("SMTP backend selected without [smtp] settings")?;
            Ok(Arc::new(SmtpEmailSender::new(settings)?))
        }
    }
}
