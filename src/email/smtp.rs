//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::broadcast::dispatcher::{EmailMessage, EmailSender};
use crate::broadcast::error::DeliveryError;
use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// Reply codes meaning the mailbox itself is gone or refuses mail.
const MAILBOX_REJECTED: [&str; 3] = ["550", "551", "553"];

#[derive(Clone)]
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(host: &str, port: u16, credentials: Option<(String, String)>, from: &str) -> AppResult<Self> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid SMTP_FROM {:?}: {}", from, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);
        if let Some((user, password)) = credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Builds a sender from the `SMTP_*` environment, or `None` when the
    /// email channel is not configured.
    pub fn from_config() -> AppResult<Option<Self>> {
        let Some(host) = config::smtp::HOST.as_deref() else {
            log::info!("SMTP_HOST not set, email broadcasts disabled");
            return Ok(None);
        };
        let Some(from) = config::smtp::FROM.as_deref() else {
            log::warn!("SMTP_HOST set but SMTP_FROM missing, email broadcasts disabled");
            return Ok(None);
        };
        let credentials = match (config::smtp::USER.clone(), config::smtp::PASSWORD.clone()) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        };

        log::info!("Email channel enabled via {}:{}", host, *config::smtp::PORT);
        Self::new(host, *config::smtp::PORT, credentials, from).map(Some)
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(&self, to: &str, message: &EmailMessage) -> Result<(), DeliveryError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| DeliveryError::RecipientBlocked(format!("invalid address {}: {}", to, e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html.clone())
            .map_err(|e| DeliveryError::RecipientPermanentError(e.to_string()))?;

        match self.transport.send(email).await {
            Ok(_) => Ok(()),
            Err(e) => Err(classify_smtp_error(&e)),
        }
    }
}

fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> DeliveryError {
    let code = error.status().map(|code| code.to_string());
    if error.is_permanent() {
        match code.as_deref() {
            Some(code) if MAILBOX_REJECTED.contains(&code) => DeliveryError::RecipientBlocked(error.to_string()),
            _ => DeliveryError::RecipientPermanentError(error.to_string()),
        }
    } else {
        DeliveryError::transient(error.to_string())
    }
}
