//! Outbound email. Workflow hooks never wait on delivery: they hand the
//! message to [`dispatch`] and carry on.

mod smtp;

pub use smtp::SmtpNotifier;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    Address(String),
    #[error("Failed to build message: {0}")]
    Message(String),
    #[error("Delivery failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    /// Sets Reply-To, used for contact inquiries
    pub reply_to: Option<String>,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
            reply_to: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), NotifyError>;
}

/// Writes messages to the log instead of sending them. Used when SMTP is not
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email delivery disabled, message logged only"
        );
        tracing::debug!(body = %email.text, "Logged email body");
        Ok(())
    }
}

/// Send in the background. Failures are logged and otherwise ignored.
pub fn dispatch(notifier: &Arc<dyn Notifier>, email: Email) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let to = email.to.clone();
        let subject = email.subject.clone();
        if let Err(e) = notifier.send(email).await {
            tracing::warn!(to = %to, subject = %subject, error = %e, "Email delivery failed");
        }
    });
}
