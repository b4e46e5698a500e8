use std::time::Duration;

use crate::traits::QueueId;

/// Errors that can occur in message transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A queue with this name already exists.
    #[error("queue '{0}' already exists")]
    QueueExists(String),

    /// No queue is registered under this name.
    #[error("no queue named '{0}'")]
    QueueNotFound(String),

    /// The queue handle does not name a live queue.
    #[error("unknown queue {0}")]
    UnknownQueue(QueueId),

    /// A blocked or subsequent receive was released by `unblock`.
    #[error("receive unblocked")]
    Unblocked,

    /// No message arrived before the receive timeout elapsed.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, TransportError>;
