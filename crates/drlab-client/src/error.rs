use drlab_net::NetError;
use drlab_shared::error::KeyError;
use drlab_shared::types::ConversationId;
use drlab_store::StoreError;
use thiserror::Error;

/// Errors surfaced to the embedder.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Login or token rejected. Fatal; the session cannot start or continue.
    #[error("Authentication rejected")]
    Auth,

    /// The private key blob could not be decrypted. Almost always a wrong
    /// password; also covers a missing or corrupt server-side blob.
    #[error("Could not unlock private key")]
    KeyUnlock,

    /// Key material needed for a conversation could not be obtained.
    #[error("Key material unavailable: {0}")]
    KeyFetch(String),

    /// Refused before any network traffic: nothing to send.
    #[error("Message is empty")]
    EmptyMessage,

    /// Plaintext exceeds the protocol bound.
    #[error("Message too large ({0} bytes)")]
    MessageTooLarge(usize),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    /// The websocket write failed. The optimistic copy stays in the
    /// transcript flagged as failed.
    #[error("Message could not be sent")]
    Send,

    /// The session event loop has stopped.
    #[error("Session is not running")]
    SessionClosed,

    /// Any other network failure.
    #[error(transparent)]
    Network(NetError),
}

impl From<NetError> for ClientError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Auth => ClientError::Auth,
            other => ClientError::Network(other),
        }
    }
}

impl From<KeyError> for ClientError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::UnlockFailed => ClientError::KeyUnlock,
            other => ClientError::KeyFetch(other.to_string()),
        }
    }
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownConversation(id) => ClientError::UnknownConversation(id),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
