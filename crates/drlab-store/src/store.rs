//! The conversation store and its mutation rules.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use drlab_shared::constants::RECONCILE_WINDOW_SECS;
use drlab_shared::types::{ConversationId, MessageId, UserId};

use crate::error::StoreError;
use crate::models::{Conversation, Delivery, Message, MessageBody};

/// What [`ConversationStore::apply_incoming`] did with a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New message appended to the transcript.
    Inserted,
    /// The message was the echo of one of our optimistic sends; the local
    /// copy was confirmed in place rather than appended.
    Confirmed,
    /// A message with this server id is already present. No-op.
    Duplicate,
    /// We have no such conversation. The caller reloads the list over REST.
    UnknownConversation,
}

/// Single-owner in-memory state. Conversations are kept most-recent-first;
/// every mutation happens on the owning task.
pub struct ConversationStore {
    current_user: UserId,
    active: Option<ConversationId>,
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new(current_user: UserId) -> Self {
        Self {
            current_user,
            active: None,
            conversations: Vec::new(),
        }
    }

    pub fn current_user(&self) -> &UserId {
        &self.current_user
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Most-recent-first snapshot.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    // ---- list maintenance ----

    /// Replace the conversation list with a fresh server snapshot. Entries
    /// absent from the snapshot are dropped; entries that persist keep their
    /// loaded transcript, preview, and local read state so a reload never
    /// wipes an open conversation.
    pub fn replace_conversations(&mut self, incoming: Vec<Conversation>) {
        let old = std::mem::take(&mut self.conversations);
        self.conversations = incoming
            .into_iter()
            .map(|mut fresh| {
                if let Some(prev) = old.iter().find(|c| c.id == fresh.id) {
                    fresh.messages = prev.messages.clone();
                    fresh.history_loaded = prev.history_loaded;
                    if fresh.last_preview.is_none() {
                        fresh.last_preview = prev.last_preview.clone();
                    }
                    // locally drained unread must not resurrect
                    if self.active.as_ref() == Some(&fresh.id) {
                        fresh.unread_count = 0;
                    }
                }
                fresh
            })
            .collect();

        if let Some(active) = &self.active {
            if self.conversation(active).is_none() {
                debug!(conversation = %active, "Active conversation gone after reload");
                self.active = None;
            }
        }
    }

    pub fn set_active(&mut self, id: Option<ConversationId>) {
        self.active = id;
    }

    // ---- history ----

    /// Merge one REST history page. Messages already present (by id) are
    /// skipped; the transcript stays in timestamp order. Returns how many
    /// messages were new.
    pub fn merge_history(
        &mut self,
        id: &ConversationId,
        page: Vec<Message>,
    ) -> Result<usize, StoreError> {
        let conv = self.conversation_mut(id)?;
        let mut added = 0;
        for msg in page {
            if conv.messages.iter().any(|m| m.id == msg.id) {
                continue;
            }
            conv.messages.push(msg);
            added += 1;
        }
        if added > 0 {
            conv.messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }
        conv.history_loaded = true;
        Ok(added)
    }

    // ---- realtime push ----

    /// Apply a message pushed over the websocket. Idempotent on duplicate
    /// server ids; echoes of our own sends confirm the optimistic copy
    /// instead of appending a second one.
    pub fn apply_incoming(&mut self, msg: Message) -> ApplyOutcome {
        let active = self.active.clone();
        let current_user = self.current_user.clone();

        let Some(pos) = self.conversations.iter().position(|c| c.id == msg.conversation_id)
        else {
            return ApplyOutcome::UnknownConversation;
        };
        let conv = &mut self.conversations[pos];

        if conv.messages.iter().any(|m| m.id == msg.id) {
            return ApplyOutcome::Duplicate;
        }

        let from_me = msg.sender_id == current_user;
        let outcome = match find_optimistic(conv, &msg, from_me) {
            Some(idx) => {
                confirm_optimistic(&mut conv.messages[idx], &msg);
                // preview/recency follow the confirmed message only when it
                // is still the transcript tail; a newer message may have
                // arrived while the echo was in flight
                if idx + 1 == conv.messages.len() {
                    let confirmed = &conv.messages[idx];
                    conv.last_activity = Some(confirmed.timestamp);
                    if let Some(text) = confirmed.body.plaintext() {
                        conv.last_preview = Some(text.to_string());
                    }
                }
                ApplyOutcome::Confirmed
            }
            None => {
                let mut msg = msg;
                msg.outgoing = from_me;
                conv.last_activity = Some(msg.timestamp);
                if let Some(text) = msg.body.plaintext() {
                    conv.last_preview = Some(text.to_string());
                }
                conv.messages.push(msg);
                ApplyOutcome::Inserted
            }
        };

        if outcome == ApplyOutcome::Inserted
            && !from_me
            && active.as_ref() != Some(&conv.id)
        {
            conv.unread_count += 1;
        }

        self.move_to_front(pos);
        outcome
    }

    /// Flip every unread incoming message in the conversation, zero its
    /// unread count, and return the ids so the caller can send receipts.
    /// Other conversations are untouched.
    pub fn mark_read(&mut self, id: &ConversationId) -> Result<Vec<MessageId>, StoreError> {
        let conv = self.conversation_mut(id)?;
        let mut ids = Vec::new();
        for msg in conv.messages.iter_mut() {
            if !msg.outgoing && !msg.read {
                msg.read = true;
                ids.push(msg.id.clone());
            }
        }
        conv.unread_count = 0;
        Ok(ids)
    }

    /// A peer read one of our messages.
    pub fn apply_read_receipt(&mut self, id: &ConversationId, message_id: &MessageId) -> bool {
        let Ok(conv) = self.conversation_mut(id) else {
            return false;
        };
        match conv.messages.iter_mut().find(|m| &m.id == message_id) {
            Some(msg) if !msg.read => {
                msg.read = true;
                true
            }
            _ => false,
        }
    }

    // ---- optimistic sends ----

    /// Insert the local copy of a message we are about to send.
    pub fn insert_optimistic(&mut self, msg: Message) -> Result<(), StoreError> {
        let pos = self
            .conversations
            .iter()
            .position(|c| c.id == msg.conversation_id)
            .ok_or_else(|| StoreError::UnknownConversation(msg.conversation_id.clone()))?;
        let conv = &mut self.conversations[pos];
        conv.last_activity = Some(msg.timestamp);
        if let Some(text) = msg.body.plaintext() {
            conv.last_preview = Some(text.to_string());
        }
        conv.messages.push(msg);
        self.move_to_front(pos);
        Ok(())
    }

    /// Flag a pending send as failed. It stays in the transcript so the user
    /// can see it and retry; it is never silently removed.
    pub fn mark_send_failed(&mut self, token: Uuid) -> Option<(ConversationId, MessageId)> {
        for conv in self.conversations.iter_mut() {
            if let Some(msg) = conv
                .messages
                .iter_mut()
                .find(|m| m.client_token == Some(token) && m.delivery == Delivery::Pending)
            {
                msg.delivery = Delivery::Failed;
                return Some((conv.id.clone(), msg.id.clone()));
            }
        }
        warn!(%token, "No pending message to fail");
        None
    }

    // ---- decryption results ----

    /// Record the decryption outcome for a message. Updates the preview when
    /// the message is the latest in its conversation.
    pub fn attach_plaintext(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        body: MessageBody,
    ) -> Result<(), StoreError> {
        let conv = self.conversation_mut(id)?;
        let is_last = conv.messages.last().map(|m| &m.id) == Some(message_id);
        if let Some(msg) = conv.messages.iter_mut().find(|m| &m.id == message_id) {
            msg.body = body;
            if is_last {
                if let Some(text) = msg.body.plaintext() {
                    conv.last_preview = Some(text.to_string());
                }
            }
        }
        Ok(())
    }

    // ---- presence / typing ----

    /// Returns true if the typing set actually changed.
    pub fn set_typing(&mut self, id: &ConversationId, user: UserId, is_typing: bool) -> bool {
        let Ok(conv) = self.conversation_mut(id) else {
            return false;
        };
        if is_typing {
            conv.typing.insert(user)
        } else {
            conv.typing.remove(&user)
        }
    }

    /// Update a user's presence everywhere they appear. Returns true if
    /// anything changed.
    pub fn set_presence(
        &mut self,
        user: &UserId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> bool {
        let mut changed = false;
        for conv in self.conversations.iter_mut() {
            for p in conv.participants.iter_mut().filter(|p| &p.id == user) {
                if p.online != online || p.last_seen != last_seen {
                    p.online = online;
                    p.last_seen = last_seen;
                    changed = true;
                }
            }
        }
        changed
    }

    // ---- internals ----

    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| StoreError::UnknownConversation(id.clone()))
    }

    fn move_to_front(&mut self, pos: usize) {
        if pos > 0 {
            let conv = self.conversations.remove(pos);
            self.conversations.insert(0, conv);
        }
    }
}

/// Find the optimistic copy an echoed message confirms. Exact match on the
/// echoed client token; if the server did not echo one, fall back to the
/// oldest pending send by the same sender within the reconciliation window.
fn find_optimistic(conv: &Conversation, incoming: &Message, from_me: bool) -> Option<usize> {
    if let Some(token) = incoming.client_token {
        return conv
            .messages
            .iter()
            .position(|m| m.client_token == Some(token) && m.delivery != Delivery::Sent);
    }
    if !from_me {
        return None;
    }
    let window = Duration::seconds(RECONCILE_WINDOW_SECS);
    conv.messages.iter().position(|m| {
        m.delivery == Delivery::Pending
            && m.outgoing
            && (incoming.timestamp - m.timestamp).abs() <= window
    })
}

/// Adopt the server's identity for a confirmed optimistic message while
/// keeping the plaintext we already hold.
fn confirm_optimistic(local: &mut Message, incoming: &Message) {
    local.id = incoming.id.clone();
    local.timestamp = incoming.timestamp;
    local.encrypted_content = incoming.encrypted_content.clone();
    local.delivery = Delivery::Sent;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use drlab_shared::types::{ConversationKind, MessageKind};

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    fn cid(s: &str) -> ConversationId {
        ConversationId::new(s)
    }

    fn participant(id: &str) -> User {
        User {
            id: uid(id),
            username: id.to_string(),
            display_name: id.to_uppercase(),
            online: false,
            last_seen: None,
            key_fingerprint: None,
        }
    }

    fn conversation(id: &str, participants: &[&str]) -> Conversation {
        let mut conv = Conversation::new(cid(id), ConversationKind::Direct);
        conv.participants = participants.iter().map(|p| participant(p)).collect();
        conv
    }

    fn store_with(convs: &[&str]) -> ConversationStore {
        let mut store = ConversationStore::new(uid("me"));
        store.replace_conversations(
            convs.iter().map(|c| conversation(c, &["me", "peer"])).collect::<Vec<_>>(),
        );
        store
    }

    fn push(id: &str, conv: &str, sender: &str) -> Message {
        Message::incoming(
            MessageId::new(id),
            cid(conv),
            uid(sender),
            sender.to_uppercase(),
            "b64ct",
            MessageKind::Text,
            Utc::now(),
        )
    }

    #[test]
    fn test_apply_is_idempotent_on_server_id() {
        let mut store = store_with(&["c1"]);
        assert_eq!(store.apply_incoming(push("m1", "c1", "peer")), ApplyOutcome::Inserted);
        assert_eq!(store.apply_incoming(push("m1", "c1", "peer")), ApplyOutcome::Duplicate);
        assert_eq!(store.conversation(&cid("c1")).unwrap().messages.len(), 1);
        assert_eq!(store.conversation(&cid("c1")).unwrap().unread_count, 1);
    }

    #[test]
    fn test_unknown_conversation_is_reported() {
        let mut store = store_with(&["c1"]);
        assert_eq!(
            store.apply_incoming(push("m1", "nope", "peer")),
            ApplyOutcome::UnknownConversation
        );
    }

    #[test]
    fn test_unread_not_incremented_when_active_or_own() {
        let mut store = store_with(&["c1"]);
        store.set_active(Some(cid("c1")));
        store.apply_incoming(push("m1", "c1", "peer"));
        assert_eq!(store.conversation(&cid("c1")).unwrap().unread_count, 0);

        store.set_active(None);
        store.apply_incoming(push("m2", "c1", "me"));
        assert_eq!(store.conversation(&cid("c1")).unwrap().unread_count, 0);

        store.apply_incoming(push("m3", "c1", "peer"));
        assert_eq!(store.conversation(&cid("c1")).unwrap().unread_count, 1);
    }

    #[test]
    fn test_new_activity_moves_conversation_to_front() {
        let mut store = store_with(&["c1", "c2", "c3"]);
        store.apply_incoming(push("m1", "c3", "peer"));
        let order: Vec<_> = store.conversations().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c3", "c1", "c2"]);
    }

    #[test]
    fn test_mark_read_is_exact() {
        let mut store = store_with(&["c1", "c2"]);
        store.apply_incoming(push("m1", "c1", "peer"));
        store.apply_incoming(push("m2", "c1", "peer"));
        store.apply_incoming(push("m3", "c2", "peer"));

        let ids = store.mark_read(&cid("c1")).unwrap();
        assert_eq!(ids, vec![MessageId::new("m1"), MessageId::new("m2")]);
        assert_eq!(store.conversation(&cid("c1")).unwrap().unread_count, 0);
        assert_eq!(store.conversation(&cid("c2")).unwrap().unread_count, 1);
        assert!(store.mark_read(&cid("c1")).unwrap().is_empty());
    }

    #[test]
    fn test_echo_confirms_optimistic_copy_by_token() {
        let mut store = store_with(&["c1"]);
        let token = Uuid::new_v4();
        store
            .insert_optimistic(Message::optimistic(
                token,
                cid("c1"),
                uid("me"),
                "ME",
                "hello there",
                "b64ct",
                MessageKind::Text,
            ))
            .unwrap();

        let mut echo = push("srv-1", "c1", "me");
        echo.client_token = Some(token);
        assert_eq!(store.apply_incoming(echo), ApplyOutcome::Confirmed);

        let conv = store.conversation(&cid("c1")).unwrap();
        assert_eq!(conv.messages.len(), 1);
        let msg = &conv.messages[0];
        assert_eq!(msg.id, MessageId::new("srv-1"));
        assert_eq!(msg.delivery, Delivery::Sent);
        assert_eq!(msg.body.plaintext(), Some("hello there"));
        assert_eq!(conv.unread_count, 0);
    }

    #[test]
    fn test_echo_without_token_falls_back_to_heuristic() {
        let mut store = store_with(&["c1"]);
        store
            .insert_optimistic(Message::optimistic(
                Uuid::new_v4(),
                cid("c1"),
                uid("me"),
                "ME",
                "typed locally",
                "b64ct",
                MessageKind::Text,
            ))
            .unwrap();

        // server does not echo the token
        assert_eq!(store.apply_incoming(push("srv-1", "c1", "me")), ApplyOutcome::Confirmed);
        assert_eq!(store.conversation(&cid("c1")).unwrap().messages.len(), 1);
    }

    #[test]
    fn test_mid_transcript_confirm_keeps_latest_preview() {
        let mut store = store_with(&["c1"]);
        let token = Uuid::new_v4();
        store
            .insert_optimistic(Message::optimistic(
                token,
                cid("c1"),
                uid("me"),
                "ME",
                "sent first",
                "b64ct",
                MessageKind::Text,
            ))
            .unwrap();

        // a peer message lands while our echo is still in flight
        let mut newer = push("m2", "c1", "peer");
        newer.timestamp = Utc::now() + Duration::minutes(1);
        newer.body = MessageBody::Plaintext("landed second".into());
        store.apply_incoming(newer.clone());

        let mut echo = push("srv-1", "c1", "me");
        echo.client_token = Some(token);
        assert_eq!(store.apply_incoming(echo), ApplyOutcome::Confirmed);

        let conv = store.conversation(&cid("c1")).unwrap();
        assert_eq!(conv.last_preview.as_deref(), Some("landed second"));
        assert_eq!(conv.last_activity, Some(newer.timestamp));
    }

    #[test]
    fn test_peer_message_never_matches_heuristic() {
        let mut store = store_with(&["c1"]);
        store
            .insert_optimistic(Message::optimistic(
                Uuid::new_v4(),
                cid("c1"),
                uid("me"),
                "ME",
                "mine",
                "b64ct",
                MessageKind::Text,
            ))
            .unwrap();

        assert_eq!(store.apply_incoming(push("srv-1", "c1", "peer")), ApplyOutcome::Inserted);
        assert_eq!(store.conversation(&cid("c1")).unwrap().messages.len(), 2);
    }

    #[test]
    fn test_failed_send_is_kept_and_flagged() {
        let mut store = store_with(&["c1"]);
        let token = Uuid::new_v4();
        store
            .insert_optimistic(Message::optimistic(
                token,
                cid("c1"),
                uid("me"),
                "ME",
                "will fail",
                "b64ct",
                MessageKind::Text,
            ))
            .unwrap();

        let (conv_id, msg_id) = store.mark_send_failed(token).unwrap();
        assert_eq!(conv_id, cid("c1"));
        let msg = store.conversation(&cid("c1")).unwrap().message(&msg_id).unwrap();
        assert_eq!(msg.delivery, Delivery::Failed);
        // failing twice is a no-op
        assert!(store.mark_send_failed(token).is_none());
    }

    #[test]
    fn test_merge_history_dedupes_and_sorts() {
        let mut store = store_with(&["c1"]);
        let t0 = Utc::now();
        let mut older = push("m1", "c1", "peer");
        older.timestamp = t0 - Duration::minutes(5);
        let mut newer = push("m2", "c1", "peer");
        newer.timestamp = t0;

        store.apply_incoming(newer.clone());
        let added = store
            .merge_history(&cid("c1"), vec![newer, older])
            .unwrap();
        assert_eq!(added, 1);

        let conv = store.conversation(&cid("c1")).unwrap();
        assert!(conv.history_loaded);
        let ids: Vec<_> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_reload_preserves_transcript_and_drops_stale() {
        let mut store = store_with(&["c1", "c2"]);
        store.apply_incoming(push("m1", "c1", "peer"));
        store.attach_plaintext(&cid("c1"), &MessageId::new("m1"), MessageBody::Plaintext("hi".into()))
            .unwrap();

        // server snapshot: c1 persists, c2 is gone, c3 is new
        store.replace_conversations(vec![
            conversation("c1", &["me", "peer"]),
            conversation("c3", &["me", "other"]),
        ]);

        let c1 = store.conversation(&cid("c1")).unwrap();
        assert_eq!(c1.messages.len(), 1);
        assert_eq!(c1.last_preview.as_deref(), Some("hi"));
        assert!(store.conversation(&cid("c2")).is_none());
        assert!(store.conversation(&cid("c3")).is_some());
    }

    #[test]
    fn test_reload_clears_vanished_active_conversation() {
        let mut store = store_with(&["c1"]);
        store.set_active(Some(cid("c1")));
        store.replace_conversations(vec![conversation("c9", &["me", "peer"])]);
        assert_eq!(store.active(), None);
    }

    #[test]
    fn test_attach_plaintext_updates_preview_for_latest_only() {
        let mut store = store_with(&["c1"]);
        let t0 = Utc::now();
        let mut first = push("m1", "c1", "peer");
        first.timestamp = t0 - Duration::minutes(1);
        let mut second = push("m2", "c1", "peer");
        second.timestamp = t0;
        store.apply_incoming(first);
        store.apply_incoming(second);

        store
            .attach_plaintext(&cid("c1"), &MessageId::new("m1"), MessageBody::Plaintext("old".into()))
            .unwrap();
        assert_eq!(store.conversation(&cid("c1")).unwrap().last_preview, None);

        store
            .attach_plaintext(&cid("c1"), &MessageId::new("m2"), MessageBody::Plaintext("new".into()))
            .unwrap();
        assert_eq!(
            store.conversation(&cid("c1")).unwrap().last_preview.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_typing_and_presence() {
        let mut store = store_with(&["c1"]);
        assert!(store.set_typing(&cid("c1"), uid("peer"), true));
        assert!(!store.set_typing(&cid("c1"), uid("peer"), true));
        assert!(store.set_typing(&cid("c1"), uid("peer"), false));

        assert!(store.set_presence(&uid("peer"), true, None));
        assert!(!store.set_presence(&uid("peer"), true, None));
        let conv = store.conversation(&cid("c1")).unwrap();
        assert!(conv.participants.iter().find(|p| p.id == uid("peer")).unwrap().online);
    }

    #[test]
    fn test_read_receipt_marks_our_message() {
        let mut store = store_with(&["c1"]);
        let token = Uuid::new_v4();
        let mut msg = Message::optimistic(
            token,
            cid("c1"),
            uid("me"),
            "ME",
            "check",
            "b64ct",
            MessageKind::Text,
        );
        msg.read = false;
        store.insert_optimistic(msg).unwrap();
        let mut echo = push("srv-1", "c1", "me");
        echo.client_token = Some(token);
        store.apply_incoming(echo);

        assert!(store.apply_read_receipt(&cid("c1"), &MessageId::new("srv-1")));
        assert!(!store.apply_read_receipt(&cid("c1"), &MessageId::new("srv-1")));
    }
}
