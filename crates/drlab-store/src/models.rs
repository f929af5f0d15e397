//! Domain records held by the store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drlab_shared::types::{ConversationId, ConversationKind, MessageId, MessageKind, UserId};

/// A participant as the client knows them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub key_fingerprint: Option<String>,
}

impl User {
    /// Display name, falling back to the login name.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

/// What we currently hold for a message's content. A message is renderable
/// only once its body has left `Encrypted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MessageBody {
    /// Ciphertext only; decryption has not run yet.
    #[default]
    Encrypted,
    /// Decrypted content, safe to render and preview.
    Plaintext(String),
    /// Decryption failed (missing key, tampered blob). Terminal; the UI
    /// shows a placeholder instead.
    DecryptFailed,
}

impl MessageBody {
    pub fn is_renderable(&self) -> bool {
        !matches!(self, MessageBody::Encrypted)
    }

    pub fn plaintext(&self) -> Option<&str> {
        match self {
            MessageBody::Plaintext(text) => Some(text),
            _ => None,
        }
    }
}

/// Delivery state of an outgoing message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistically inserted, not yet echoed by the server.
    Pending,
    /// Confirmed by the server (or not ours to begin with).
    Sent,
    /// The websocket write failed. The message stays visible for retry.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Present on outgoing messages; the server echoes it back so the
    /// optimistic copy can be matched exactly.
    pub client_token: Option<Uuid>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    /// Base64 `nonce ‖ ciphertext`, exactly as carried on the wire.
    pub encrypted_content: String,
    pub body: MessageBody,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub reply_to: Option<MessageId>,
    /// Sent by the current user.
    pub outgoing: bool,
    pub delivery: Delivery,
}

impl Message {
    /// A message received from the server, body still encrypted.
    pub fn incoming(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_name: impl Into<String>,
        encrypted_content: impl Into<String>,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_token: None,
            conversation_id,
            sender_id,
            sender_name: sender_name.into(),
            encrypted_content: encrypted_content.into(),
            body: MessageBody::Encrypted,
            kind,
            timestamp,
            read: false,
            reply_to: None,
            outgoing: false,
            delivery: Delivery::Sent,
        }
    }

    /// The local optimistic copy of a message we just sent. It carries the
    /// plaintext we typed and a provisional id until the echo arrives.
    pub fn optimistic(
        client_token: Uuid,
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_name: impl Into<String>,
        plaintext: impl Into<String>,
        encrypted_content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: MessageId::new(format!("local-{client_token}")),
            client_token: Some(client_token),
            conversation_id,
            sender_id,
            sender_name: sender_name.into(),
            encrypted_content: encrypted_content.into(),
            body: MessageBody::Plaintext(plaintext.into()),
            kind,
            timestamp: Utc::now(),
            read: true,
            reply_to: None,
            outgoing: true,
            delivery: Delivery::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub participants: Vec<User>,
    pub messages: Vec<Message>,
    pub unread_count: u32,
    /// Plaintext preview of the latest message. Only ever set from a
    /// decrypted body; ciphertext never leaks into the list pane.
    pub last_preview: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    /// First history page has been merged.
    pub history_loaded: bool,
    pub typing: HashSet<UserId>,
}

impl Conversation {
    pub fn new(id: ConversationId, kind: ConversationKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            participants: Vec::new(),
            messages: Vec::new(),
            unread_count: 0,
            last_preview: None,
            last_activity: None,
            history_loaded: false,
            typing: HashSet::new(),
        }
    }

    /// Name shown in the conversation list: the explicit title if set, the
    /// other party's name for a direct conversation, a generic label last.
    pub fn display_name(&self, current_user: &UserId) -> String {
        if let Some(title) = &self.title {
            if !title.is_empty() {
                return title.clone();
            }
        }
        if self.kind == ConversationKind::Direct {
            if let Some(peer) = self.participants.iter().find(|p| &p.id != current_user) {
                return peer.name().to_string();
            }
        }
        "Conversation".to_string()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }
}
