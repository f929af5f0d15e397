//! Domain events emitted to the embedding UI.
//!
//! The session event loop owns all mutable state; the embedder receives
//! these over an mpsc channel and marshals them to its rendering context.
//! Payloads are self-contained clones, never references into the store.

use drlab_shared::types::{ConnectionState, ConversationId, MessageId, UserId};
use drlab_store::Message;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),

    /// The conversation list was reloaded or reordered; re-pull a snapshot.
    ConversationsRefreshed,

    /// A message entered a transcript (push or optimistic insert).
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },

    /// An existing message changed in place (confirmed, failed, read,
    /// decrypted).
    MessageUpdated {
        conversation_id: ConversationId,
        message_id: MessageId,
    },

    UnreadChanged {
        conversation_id: ConversationId,
        unread: u32,
        total: u32,
    },

    TypingChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        user_name: String,
        is_typing: bool,
    },

    PresenceChanged {
        user_id: UserId,
        online: bool,
    },

    /// Out-of-focus alert for a conversation the user is not looking at.
    /// The embedder decides how (and whether) to render it.
    Notification { title: String, body: String },

    /// A non-fatal error worth surfacing (server error frame, failed
    /// refresh). The session keeps running.
    Error { message: String },
}
