//! Realtime wire protocol: JSON text frames over the persistent websocket.
//!
//! Every frame is an object with a `type` tag. Frames are delivered to
//! handlers in wire order; unrecognized inbound types deserialize to
//! [`ServerFrame::Unknown`] so a newer server cannot kill the receive loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConversationId, MessageId, MessageKind, UserId};

/// Frames the client writes to the messaging socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Submit an encrypted message. `client_token` is a client-generated
    /// idempotency token the server echoes back in the corresponding
    /// `new_message`, making optimistic reconciliation exact.
    SendMessage {
        conversation_id: ConversationId,
        client_token: Uuid,
        encrypted_content: String,
        message_type: MessageKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<MessageId>,
    },

    /// Subscribe to a conversation's room so pushes are targeted at us.
    JoinConversation { conversation_id: ConversationId },

    /// Unsubscribe from a conversation's room.
    LeaveConversation { conversation_id: ConversationId },

    /// Read receipt for a single message. Fire-and-forget.
    MarkAsRead { message_id: MessageId },

    /// Presence hint while composing.
    TypingIndicator {
        conversation_id: ConversationId,
        is_typing: bool,
    },

    /// Post-handshake hello, acknowledged by the server.
    ConnectionEstablished {},
}

/// Frames pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    NewMessage(NewMessage),

    /// Conversation metadata changed (participants, title, presence). The
    /// client reloads the conversation list except for presence updates,
    /// which are applied directly from `data`.
    ConversationUpdated {
        conversation_id: ConversationId,
        update_type: String,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Out-of-focus alert for a message in a conversation the user is not
    /// currently looking at. The preview is server-side plaintext-free
    /// metadata only.
    NewMessageNotification {
        conversation_id: ConversationId,
        conversation_name: String,
        sender_name: String,
        message_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// Another participant read one of our messages.
    ReadStatusUpdate {
        message_id: MessageId,
        user_id: UserId,
        conversation_id: ConversationId,
        read_at: DateTime<Utc>,
    },

    TypingIndicator {
        conversation_id: ConversationId,
        user_id: UserId,
        user_name: String,
        is_typing: bool,
    },

    /// Server-side error report. Logged; the connection stays open.
    Error { message: String },

    /// Acknowledgement of our post-handshake hello.
    ConnectionEstablished {},

    #[serde(other)]
    Unknown,
}

/// Payload of a `new_message` push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub encrypted_content: String,
    pub message_type: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    /// Echo of the sender's idempotency token. Absent on servers that do
    /// not thread it through; reconciliation then falls back to heuristics.
    #[serde(default)]
    pub client_token: Option<Uuid>,
}

/// Descriptor carried (encrypted) as the body of a file message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_message_wire_shape() {
        let frame = ClientFrame::SendMessage {
            conversation_id: ConversationId::new("conv1"),
            client_token: Uuid::nil(),
            encrypted_content: "AAECAw==".into(),
            message_type: MessageKind::Text,
            reply_to_id: None,
        };

        let value: serde_json::Value =
            serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "send_message");
        assert_eq!(value["conversation_id"], "conv1");
        assert_eq!(value["message_type"], "text");
        // absent, not null
        assert!(value.get("reply_to_id").is_none());
    }

    #[test]
    fn test_new_message_roundtrip() {
        let text = json!({
            "type": "new_message",
            "message_id": "m-7",
            "conversation_id": "conv1",
            "sender_id": "u-2",
            "sender_name": "Marie Curie",
            "encrypted_content": "AAECAw==",
            "message_type": "text",
            "timestamp": "2025-06-01T10:00:00Z",
            "client_token": "00000000-0000-0000-0000-000000000000"
        })
        .to_string();

        let frame = ServerFrame::from_text(&text).unwrap();
        match frame {
            ServerFrame::NewMessage(m) => {
                assert_eq!(m.message_id, MessageId::new("m-7"));
                assert_eq!(m.client_token, Some(Uuid::nil()));
                assert_eq!(m.reply_to_id, None);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let frame =
            ServerFrame::from_text(r#"{"type":"shiny_new_feature","x":1}"#).unwrap();
        assert_eq!(frame, ServerFrame::Unknown);
    }

    #[test]
    fn test_error_frame() {
        let frame = ServerFrame::from_text(r#"{"type":"error","message":"nope"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Error {
                message: "nope".into()
            }
        );
    }

    #[test]
    fn test_typing_indicator_both_directions() {
        let out = ClientFrame::TypingIndicator {
            conversation_id: ConversationId::new("conv1"),
            is_typing: true,
        };
        let value: serde_json::Value =
            serde_json::from_str(&out.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "typing_indicator");
        assert_eq!(value["is_typing"], true);

        let inbound = ServerFrame::from_text(
            r#"{"type":"typing_indicator","conversation_id":"conv1","user_id":"u-2","user_name":"Marie","is_typing":false}"#,
        )
        .unwrap();
        match inbound {
            ServerFrame::TypingIndicator { is_typing, .. } => assert!(!is_typing),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
