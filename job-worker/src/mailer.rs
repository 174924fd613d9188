//! The `Mailer` boundary: order-confirmation and shipping-notification
//! handlers depend on this trait, never on an SMTP client directly.

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("mailer send failed: {0}")]
    SendFailed(String),
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError>;
}

/// Ships for local/dev use; the real SMTP implementation is out of scope.
pub struct NoopMailer;

#[async_trait::async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError> {
        info!(to, subject, body_len = body.len(), "noop mailer: send suppressed");
        Ok(())
    }
}
