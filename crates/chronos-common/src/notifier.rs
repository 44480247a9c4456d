//! The single interface the delivery core needs from a concrete channel
//! implementation. Email/chat/stdout dispatch themselves are external
//! collaborators; this crate only owns the trait and a stub good enough
//! to run the service end-to-end in development.

use async_trait::async_trait;

use crate::Notification;

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifierError>;
}

/// Writes the notification to stdout and always succeeds. Useful for
/// local development and as the default wiring when no real channel
/// client is configured.
#[derive(Debug, Default)]
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifierError> {
        println!(
            "[{}] -> {}: {}",
            notification.channel, notification.id, notification.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Channel, Status};
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn stdout_notifier_always_succeeds() {
        let notifier = StdoutNotifier;
        let notification = Notification {
            id: Uuid::new_v4(),
            channel: Channel::Stdout,
            subject: None,
            message: "hello".to_string(),
            status: Status::Pending,
            send_at: Utc::now(),
            send_at_local: "now".to_string(),
            recipients: vec![],
            updated_at: Utc::now(),
        };
        assert!(notifier.deliver(&notification).await.is_ok());
    }
}
