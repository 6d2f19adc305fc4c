//! New-posting notifications: message rendering + mail delivery.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use jobwatch_core::Posting;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "jobwatch-notify";

pub const SENDER_ENV: &str = "SENDER_EMAIL";
pub const RECIPIENT_ENV: &str = "RECEIVER_EMAIL";
pub const PASSWORD_ENV: &str = "EMAIL_PASSWORD";

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("rendering message body: {0}")]
    Render(#[from] askama::Error),
    #[error("invalid mailbox {value:?}: {source}")]
    Address {
        value: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("building email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct MailCredentials {
    pub sender: String,
    pub recipient: String,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailCredentials")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("password", &"<redacted>")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

pub const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
}

impl MailCredentials {
    pub fn tls_mode(&self) -> TlsMode {
        if self.smtp_port == IMPLICIT_TLS_PORT {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }
}

/// Mail settings, or the names of the settings that were missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailConfig {
    Configured(MailCredentials),
    NotConfigured { missing: Vec<&'static str> },
}

impl MailConfig {
    /// Blank values count as missing.
    pub fn from_parts(
        sender: Option<String>,
        recipient: Option<String>,
        password: Option<String>,
        smtp_host: Option<String>,
        smtp_port: Option<u16>,
    ) -> Self {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (sender, recipient, password) = (present(sender), present(recipient), present(password));

        match (sender, recipient, password) {
            (Some(sender), Some(recipient), Some(password)) => {
                MailConfig::Configured(MailCredentials {
                    sender: sender.trim().to_string(),
                    recipient: recipient.trim().to_string(),
                    password,
                    smtp_host: present(smtp_host).unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                    smtp_port: smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
                })
            }
            (sender, recipient, password) => {
                let mut missing = Vec::new();
                if sender.is_none() {
                    missing.push(SENDER_ENV);
                }
                if recipient.is_none() {
                    missing.push(RECIPIENT_ENV);
                }
                if password.is_none() {
                    missing.push(PASSWORD_ENV);
                }
                MailConfig::NotConfigured { missing }
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, MailConfig::Configured(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub subject: String,
    pub html_body: String,
}

#[derive(Template)]
#[template(path = "new_postings.html")]
struct NewPostingsTemplate<'a> {
    postings: &'a [Posting],
    count: usize,
    date: String,
}

pub fn build_message(
    postings: &[Posting],
    today: NaiveDate,
) -> Result<NotificationMessage, NotifyError> {
    let date = today.format("%Y-%m-%d").to_string();
    let subject = format!(
        "Job Alert: {} New Openings Found ({date})",
        postings.len()
    );
    let html_body = NewPostingsTemplate {
        postings,
        count: postings.len(),
        date,
    }
    .render()?;
    Ok(NotificationMessage { subject, html_body })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent { recipient: String, count: usize },
    Skipped { missing: Vec<&'static str> },
}

/// Tells the user about newly found postings. Callers only invoke it with a non-empty slice.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, postings: &[Posting]) -> Result<NotifyOutcome, NotifyError>;
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        credentials: &MailCredentials,
        message: &NotificationMessage,
    ) -> Result<(), NotifyError>;
}

/// SMTP submission authenticated as the sender; TLS mode follows the configured port.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpMailTransport;

fn mailbox(value: &str) -> Result<Mailbox, NotifyError> {
    value.parse().map_err(|source| NotifyError::Address {
        value: value.to_string(),
        source,
    })
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(
        &self,
        credentials: &MailCredentials,
        message: &NotificationMessage,
    ) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(mailbox(&credentials.sender)?)
            .to(mailbox(&credentials.recipient)?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())?;

        let builder = match credentials.tls_mode() {
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&credentials.smtp_host),
            TlsMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&credentials.smtp_host)
            }
        };
        let mailer = builder
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .port(credentials.smtp_port)
            .credentials(Credentials::new(
                credentials.sender.clone(),
                credentials.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}

pub struct EmailNotifier {
    config: MailConfig,
    transport: Arc<dyn MailTransport>,
}

impl EmailNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self::with_transport(config, Arc::new(SmtpMailTransport))
    }

    pub fn with_transport(config: MailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, postings: &[Posting]) -> Result<NotifyOutcome, NotifyError> {
        let credentials = match &self.config {
            MailConfig::Configured(credentials) => credentials,
            MailConfig::NotConfigured { missing } => {
                warn!(?missing, "email credentials missing; skipping notification");
                return Ok(NotifyOutcome::Skipped {
                    missing: missing.clone(),
                });
            }
        };

        let message = build_message(postings, Local::now().date_naive())?;
        self.transport.send(credentials, &message).await?;
        info!(
            recipient = %credentials.recipient,
            count = postings.len(),
            "notification email sent"
        );
        Ok(NotifyOutcome::Sent {
            recipient: credentials.recipient.clone(),
            count: postings.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<NotificationMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(
            &self,
            _credentials: &MailCredentials,
            message: &NotificationMessage,
        ) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Delivery("connection reset".into()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn configured() -> MailConfig {
        MailConfig::from_parts(
            Some("alerts@example.com".into()),
            Some("me@example.com".into()),
            Some("app-password".into()),
            None,
            None,
        )
    }

    fn postings() -> Vec<Posting> {
        vec![
            Posting::from_link("https://x/1", "Acme | Apply SDE-1 New Grad"),
            Posting::from_link("https://x/2", "Initech | <Intern> & co"),
        ]
    }

    #[test]
    fn subject_carries_count_and_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let message = build_message(&postings(), date).unwrap();
        assert_eq!(message.subject, "Job Alert: 2 New Openings Found (2026-03-07)");
    }

    #[test]
    fn body_lists_every_posting_escaped() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let message = build_message(&postings(), date).unwrap();
        assert_eq!(message.html_body.matches("<li>").count(), 2);
        assert!(message.html_body.contains("Acme | Apply SDE-1 New Grad"));
        assert!(message.html_body.contains("&lt;Intern&gt; &amp; co"));
        assert!(message.html_body.contains("2 new postings as of 2026-03-07"));
    }

    #[test]
    fn blank_or_absent_fields_are_reported_missing() {
        let config = MailConfig::from_parts(Some("a@example.com".into()), Some("  ".into()), None, None, None);
        assert_eq!(
            config,
            MailConfig::NotConfigured {
                missing: vec![RECIPIENT_ENV, PASSWORD_ENV]
            }
        );
    }

    #[test]
    fn configured_defaults_to_gmail_submission_port() {
        let MailConfig::Configured(creds) = configured() else {
            panic!("expected configured");
        };
        assert_eq!(creds.smtp_host, DEFAULT_SMTP_HOST);
        assert_eq!(creds.smtp_port, 587);
        assert!(!format!("{creds:?}").contains("app-password"));
    }

    #[test]
    fn smtps_port_selects_implicit_tls() {
        let smtps = MailConfig::from_parts(
            Some("alerts@example.com".into()),
            Some("me@example.com".into()),
            Some("pw".into()),
            Some("smtp.example.com".into()),
            Some(465),
        );
        let MailConfig::Configured(smtps) = smtps else {
            panic!("expected configured");
        };
        assert_eq!(smtps.tls_mode(), TlsMode::Implicit);

        let MailConfig::Configured(submission) = configured() else {
            panic!("expected configured");
        };
        assert_eq!(submission.tls_mode(), TlsMode::StartTls);
    }

    #[tokio::test]
    async fn unconfigured_notifier_skips_without_sending() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = EmailNotifier::with_transport(
            MailConfig::from_parts(None, None, None, None, None),
            transport.clone(),
        );

        let outcome = notifier.notify(&postings()).await.unwrap();
        assert_eq!(
            outcome,
            NotifyOutcome::Skipped {
                missing: vec![SENDER_ENV, RECIPIENT_ENV, PASSWORD_ENV]
            }
        );
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn configured_notifier_sends_one_message() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = EmailNotifier::with_transport(configured(), transport.clone());

        let outcome = notifier.notify(&postings()).await.unwrap();
        assert_eq!(
            outcome,
            NotifyOutcome::Sent {
                recipient: "me@example.com".into(),
                count: 2
            }
        );
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("Job Alert: 2 New Openings Found ("));
    }

    #[tokio::test]
    async fn transport_failure_is_returned_to_caller() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let notifier = EmailNotifier::with_transport(configured(), transport);
        let err = notifier.notify(&postings()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
    }

    #[tokio::test]
    async fn bad_sender_address_is_rejected_before_connecting() {
        let config = MailConfig::from_parts(
            Some("not an address".into()),
            Some("me@example.com".into()),
            Some("pw".into()),
            None,
            None,
        );
        let notifier = EmailNotifier::new(config);
        let err = notifier.notify(&postings()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Address { .. }));
    }
}
