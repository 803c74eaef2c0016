// ABOUTME: Outbound notification contract for subscription lifecycle email.
// ABOUTME: SMTP delivery is an external collaborator; the default impl only logs.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::User;

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sent once when an active subscription lapses.
    async fn send_subscription_expired(&self, user: &User) -> Result<(), MailError>;

    /// Sent once inside the reminder window before expiry.
    async fn send_expiry_reminder(&self, user: &User, days_left: i64) -> Result<(), MailError>;
}

/// Logs instead of delivering. Stands in wherever no SMTP relay is wired.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_subscription_expired(&self, user: &User) -> Result<(), MailError> {
        tracing::info!(user = %user.id, email = %user.email, "subscription expired notice");
        Ok(())
    }

    async fn send_expiry_reminder(&self, user: &User, days_left: i64) -> Result<(), MailError> {
        tracing::info!(user = %user.id, email = %user.email, days_left, "expiry reminder");
        Ok(())
    }
}
