use async_trait::async_trait;
use classbook_core::{BookingDetails, NotificationError, NotificationPort, OperationKind, Pass};
use classbook_shared::Masked;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use tracing::info;

use crate::app_config::{EmailConfig, EmailMode};

/// A rendered plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers rendered emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, mail: Outgoing) -> Result<(), NotificationError>;
}

/// Renders every notification as email and hands it to a [`Mailer`].
pub struct EmailNotifier<M> {
    mailer: M,
}

impl<M: Mailer> EmailNotifier<M> {
    pub fn new(mailer: M) -> Self {
        Self { mailer }
    }
}

fn slot(details: &BookingDetails) -> String {
    format!(
        "{} ({}) at {} on {}",
        details.class_name,
        details.level,
        details.location,
        details.starts_at.format("%Y-%m-%d %H:%M UTC")
    )
}

fn greeting(first_name: &str) -> String {
    match first_name.trim() {
        "" => "Hi there".to_string(),
        name => format!("Hi {}", name),
    }
}

fn confirmation_link_mail(email: &str, first_name: &str, kind: OperationKind, link: &str) -> Outgoing {
    let (subject, action) = match kind {
        OperationKind::CreateBooking => ("Please confirm your booking", "confirm your booking"),
        OperationKind::CancelBooking => ("Please confirm your cancellation", "confirm your cancellation"),
    };
    Outgoing {
        to: email.to_string(),
        subject: subject.to_string(),
        body: format!(
            "{},\n\nPlease open the link below to {}:\n\n{}\n\nIf you did not request this, you can ignore this email.",
            greeting(first_name),
            action,
            link
        ),
    }
}

fn booking_confirmed_mail(details: &BookingDetails, cancellation_link: &str) -> Outgoing {
    Outgoing {
        to: details.email.clone(),
        subject: format!("Booking confirmed: {}", details.class_name),
        body: format!(
            "{},\n\nYour seat is booked for {}.\n\nCan't make it? Cancel here:\n{}",
            greeting(&details.first_name),
            slot(details),
            cancellation_link
        ),
    }
}

fn booking_cancelled_mail(details: &BookingDetails) -> Outgoing {
    Outgoing {
        to: details.email.clone(),
        subject: format!("Booking cancelled: {}", details.class_name),
        body: format!(
            "{},\n\nYour booking for {} has been cancelled.",
            greeting(&details.first_name),
            slot(details)
        ),
    }
}

fn owner_notice_mail(owner_email: &str, details: &BookingDetails) -> Outgoing {
    Outgoing {
        to: owner_email.to_string(),
        subject: format!("Cancellation: {}", details.class_name),
        body: format!(
            "{} <{}> cancelled their booking for {}.",
            details.attendee_name(),
            details.email,
            slot(details)
        ),
    }
}

fn pass_activated_mail(pass: &Pass) -> Outgoing {
    Outgoing {
        to: pass.email.clone(),
        subject: "Your pass is active".to_string(),
        body: format!(
            "Your pass is now active with {} of {} credits remaining.",
            pass.remaining_credits(),
            pass.total_credits
        ),
    }
}

#[async_trait]
impl<M: Mailer> NotificationPort for EmailNotifier<M> {
    async fn send_confirmation_link(
        &self,
        email: &str,
        first_name: &str,
        kind: OperationKind,
        link: &str,
    ) -> Result<(), NotificationError> {
        self.mailer
            .deliver(confirmation_link_mail(email, first_name, kind, link))
            .await
    }

    async fn send_booking_confirmed(
        &self,
        details: &BookingDetails,
        cancellation_link: &str,
    ) -> Result<(), NotificationError> {
        self.mailer
            .deliver(booking_confirmed_mail(details, cancellation_link))
            .await
    }

    async fn send_booking_cancelled(&self, details: &BookingDetails) -> Result<(), NotificationError> {
        self.mailer.deliver(booking_cancelled_mail(details)).await
    }

    async fn send_owner_cancellation_notice(
        &self,
        owner_email: &str,
        details: &BookingDetails,
    ) -> Result<(), NotificationError> {
        self.mailer.deliver(owner_notice_mail(owner_email, details)).await
    }

    async fn send_pass_activated(&self, pass: &Pass) -> Result<(), NotificationError> {
        self.mailer.deliver(pass_activated_mail(pass)).await
    }
}

/// Logs emails instead of sending them. For local development.
#[derive(Debug, Clone, Default)]
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn deliver(&self, mail: Outgoing) -> Result<(), NotificationError> {
        info!(
            to = %Masked(mail.to.as_str()),
            subject = %mail.subject,
            "Email (console mode):\n{}",
            mail.body
        );
        Ok(())
    }
}

/// Sends through an SMTP relay with lettre. The transport is blocking and
/// runs on the blocking pool.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, NotificationError> {
        let server = config
            .smtp_server
            .as_deref()
            .ok_or_else(|| NotificationError::Transport("email.smtp_server is not set".to_string()))?;

        let mut builder = SmtpTransport::relay(server)
            .map_err(|e| NotificationError::Transport(format!("SMTP relay error: {}", e)))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::InvalidAddress(format!("from address: {}", e)))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, mail: Outgoing) -> Result<(), NotificationError> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .map_err(|_| NotificationError::InvalidAddress(Masked(mail.to.as_str()).to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| NotificationError::Transport(format!("Failed to build email: {}", e)))?;

        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotificationError::Transport(format!("Email task failed: {}", e)))?
            .map_err(|e| NotificationError::Transport(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

pub type ConsoleNotifier = EmailNotifier<ConsoleMailer>;
pub type SmtpNotifier = EmailNotifier<SmtpMailer>;

/// Picks the notifier for the configured email mode.
pub fn build_notifier(config: &EmailConfig) -> Result<Arc<dyn NotificationPort>, NotificationError> {
    match config.mode {
        EmailMode::Console => Ok(Arc::new(EmailNotifier::new(ConsoleMailer))),
        EmailMode::Smtp => Ok(Arc::new(EmailNotifier::new(SmtpMailer::new(config)?))),
    }
}
