use drlab_shared::types::ConversationId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The operation named a conversation the store has never seen.
    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),
}
