use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue not connected")]
    NotConnected,
}

impl QueueError {
    /// The broker responds to a mismatched queue redeclaration with a
    /// 406 PRECONDITION_FAILED channel close. Re-declaring the same per-id
    /// queue with a different TTL during a recovery re-enqueue is exactly
    /// this case, and the design treats it as a successful enqueue (4.4):
    /// the message is already scheduled under the first declaration.
    pub fn is_precondition_failed(&self) -> bool {
        match self {
            QueueError::Amqp(e) => {
                let msg = e.to_string();
                msg.contains("406") || msg.contains("PRECONDITION_FAILED")
            }
            _ => false,
        }
    }
}
