//! Notification seam for accepted submissions.
//!
//! The actual mail transport is an external collaborator; the default
//! implementation logs the submission instead of sending anything.
//! Notification failures are logged and never fail the request.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::store::NewContact;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per accepted submission, after it is persisted.
    async fn notify_submission(&self, contact_id: i64, contact: &NewContact) -> Result<()>;
}

/// Default notifier: writes a structured log line per submission.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_submission(&self, contact_id: i64, contact: &NewContact) -> Result<()> {
        info!(
            contact_id,
            name = %contact.name,
            email = %contact.email,
            "new contact submission accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let contact = NewContact {
            name: "Maria".to_string(),
            email: "maria@gmail.com".to_string(),
            phone: None,
            equipment_type: None,
            problem_description: "La pantalla parpadea al encender.".to_string(),
            ip: "203.0.113.1".to_string(),
            user_agent: None,
        };
        assert!(LogNotifier.notify_submission(1, &contact).await.is_ok());
    }
}
