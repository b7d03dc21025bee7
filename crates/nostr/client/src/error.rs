//! Client error types

use crate::message::MessageError;
use crate::pool::PublishOutcome;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure (connect, send, read)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed or unexpected relay frame
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Relay answered OK=false or CLOSED for a message we were waiting on
    #[error("Relay {relay} rejected {message_id}: {message}")]
    AckFailure {
        relay: String,
        message_id: String,
        message: String,
    },

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Publish did not reach the number of accepting relays the policy requires
    #[error("Publish failed: {} of {} required relays accepted", .outcome.accepted_count(), .required)]
    PublishRejected {
        required: usize,
        outcome: Box<PublishOutcome>,
    },

    /// Subscription id already registered in this pool
    #[error("Duplicate subscription id: {0}")]
    DuplicateSubscription(String),

    /// Operation on a subscription that is already closed
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    /// No relays to operate on
    #[error("No relays in pool")]
    NoRelays,

    /// Pool has been closed
    #[error("Relay pool is closed")]
    PoolClosed,

    /// Signing collaborator failed
    #[error("Signer error: {0}")]
    Signer(String),
}

impl ClientError {
    /// Whether an external retry policy may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::NotConnected | ClientError::Timeout(_)
        )
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
