//! The messaging session: login, key unlock, realtime channel, and the
//! event loop that owns the conversation store.
//!
//! All state mutation happens on the session task. The embedder talks to it
//! through a cloneable [`SessionHandle`] and receives [`SessionEvent`]s plus
//! on-demand snapshots; nothing else touches the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use drlab_net::{
    ApiClient, ChannelConfig, ChannelEvent, ConversationDto, FileUploadDto, MessageDto,
    NetError, ParticipantDto, RealtimeChannel, UserProfile,
};
use drlab_shared::protocol::{ClientFrame, FileAttachment, NewMessage, ServerFrame};
use drlab_shared::types::{
    ConnectionState, ConversationId, ConversationKind, MessageId, MessageKind, UserId,
};
use drlab_store::{
    ApplyOutcome, Conversation, ConversationStore, Delivery, Message, MessageBody, User,
};

use crate::config::ClientConfig;
use crate::crypto::ConversationCrypto;
use crate::error::{ClientError, Result};
use crate::events::SessionEvent;
use crate::keystore::CryptoKeyStore;

// ---------------------------------------------------------------------------
// REST seam
// ---------------------------------------------------------------------------

/// The REST operations the session worker performs, as a seam so the worker
/// can be driven against a fake backend.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn list_conversations(&self) -> std::result::Result<Vec<ConversationDto>, NetError>;

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> std::result::Result<Vec<MessageDto>, NetError>;

    async fn create_conversation(
        &self,
        participants: &[UserId],
        kind: ConversationKind,
        title: Option<&str>,
    ) -> std::result::Result<ConversationDto, NetError>;

    async fn search_users(&self, query: &str)
        -> std::result::Result<Vec<UserProfile>, NetError>;

    async fn upload_attachment(
        &self,
        file_name: &str,
        data: Vec<u8>,
    ) -> std::result::Result<FileUploadDto, NetError>;

    async fn logout(&self) -> std::result::Result<(), NetError>;
}

#[async_trait]
impl MessagingApi for ApiClient {
    async fn list_conversations(&self) -> std::result::Result<Vec<ConversationDto>, NetError> {
        ApiClient::list_conversations(self).await
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> std::result::Result<Vec<MessageDto>, NetError> {
        ApiClient::list_messages(self, conversation, page, page_size).await
    }

    async fn create_conversation(
        &self,
        participants: &[UserId],
        kind: ConversationKind,
        title: Option<&str>,
    ) -> std::result::Result<ConversationDto, NetError> {
        ApiClient::create_conversation(self, participants, kind, title).await
    }

    async fn search_users(
        &self,
        query: &str,
    ) -> std::result::Result<Vec<UserProfile>, NetError> {
        ApiClient::search_users(self, query).await
    }

    async fn upload_attachment(
        &self,
        file_name: &str,
        data: Vec<u8>,
    ) -> std::result::Result<FileUploadDto, NetError> {
        ApiClient::upload_attachment(self, file_name, data).await
    }

    async fn logout(&self) -> std::result::Result<(), NetError> {
        ApiClient::logout(self).await
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum SessionCommand {
    Select {
        id: ConversationId,
        done: oneshot::Sender<Result<()>>,
    },
    SendMessage {
        conversation: ConversationId,
        content: String,
        kind: MessageKind,
        reply_to: Option<MessageId>,
        done: oneshot::Sender<Result<MessageId>>,
    },
    SendFile {
        conversation: ConversationId,
        file_name: String,
        data: Vec<u8>,
        done: oneshot::Sender<Result<MessageId>>,
    },
    LoadHistoryPage {
        conversation: ConversationId,
        page: u32,
        done: oneshot::Sender<Result<usize>>,
    },
    CreateConversation {
        participants: Vec<UserId>,
        kind: ConversationKind,
        title: Option<String>,
        done: oneshot::Sender<Result<ConversationId>>,
    },
    SearchUsers {
        query: String,
        done: oneshot::Sender<Result<Vec<UserProfile>>>,
    },
    SetTyping {
        is_typing: bool,
    },
    Refresh {
        done: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        done: oneshot::Sender<Vec<Conversation>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    Logout {
        done: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

pub struct MessagingSession;

impl MessagingSession {
    /// Authenticate, unlock the private key, connect the realtime channel,
    /// load the conversation list, and spawn the session event loop.
    ///
    /// A rejected login or wrong key password fails here; everything after
    /// this call is recoverable without restarting the session.
    pub async fn start(
        config: ClientConfig,
        username: &str,
        password: &str,
    ) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
        let api = Arc::new(ApiClient::new(&config.api_base_url, config.request_timeout)?);
        let login = api.login(username, password).await?;
        info!(user = %login.user.id, "Logged in");

        let keystore = Arc::new(CryptoKeyStore::new(api.clone(), login.user.id.clone()));
        keystore.unlock(password).await?;

        let channel_config = ChannelConfig {
            url: config.ws_url(),
            write_timeout: config.write_timeout,
            reconnect_delay: config.reconnect_delay,
        };
        let (channel, channel_events) =
            RealtimeChannel::connect(channel_config, login.access.clone()).await?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let mut worker = SessionWorker {
            api: api.clone(),
            crypto: ConversationCrypto::new(keystore.clone()),
            keystore,
            channel,
            store: ConversationStore::new(login.user.id.clone()),
            events: event_tx,
            page_size: config.page_size,
            profile: login.user.clone(),
            connected_once: false,
        };
        worker.refresh().await?;
        tokio::spawn(worker.run(cmd_rx, channel_events));

        Ok((
            SessionHandle {
                cmd_tx,
                profile: login.user,
            },
            event_rx,
        ))
    }
}

/// Cloneable handle to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    profile: UserProfile,
}

impl SessionHandle {
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn user_id(&self) -> &UserId {
        &self.profile.id
    }

    /// Open a conversation: join its room, load history if needed, decrypt,
    /// and drain its unread count.
    pub async fn select_conversation(&self, id: ConversationId) -> Result<()> {
        self.request(|done| SessionCommand::Select { id, done }).await?
    }

    pub async fn send_message(
        &self,
        conversation: ConversationId,
        content: String,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        self.request(|done| SessionCommand::SendMessage {
            conversation,
            content,
            kind: MessageKind::Text,
            reply_to,
            done,
        })
        .await?
    }

    pub async fn send_file(
        &self,
        conversation: ConversationId,
        file_name: String,
        data: Vec<u8>,
    ) -> Result<MessageId> {
        self.request(|done| SessionCommand::SendFile {
            conversation,
            file_name,
            data,
            done,
        })
        .await?
    }

    /// Fetch and merge an older history page (1-based; page 1 is the newest).
    /// Returns how many messages were new.
    pub async fn load_history_page(
        &self,
        conversation: ConversationId,
        page: u32,
    ) -> Result<usize> {
        self.request(|done| SessionCommand::LoadHistoryPage {
            conversation,
            page,
            done,
        })
        .await?
    }

    pub async fn create_conversation(
        &self,
        participants: Vec<UserId>,
        kind: ConversationKind,
        title: Option<String>,
    ) -> Result<ConversationId> {
        self.request(|done| SessionCommand::CreateConversation {
            participants,
            kind,
            title,
            done,
        })
        .await?
    }

    pub async fn search_users(&self, query: impl Into<String>) -> Result<Vec<UserProfile>> {
        self.request(|done| SessionCommand::SearchUsers {
            query: query.into(),
            done,
        })
        .await?
    }

    /// Typing hint for the currently selected conversation. Fire-and-forget.
    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        self.cmd_tx
            .send(SessionCommand::SetTyping { is_typing })
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    /// Reload the conversation list from the server.
    pub async fn refresh(&self) -> Result<()> {
        self.request(|done| SessionCommand::Refresh { done }).await?
    }

    /// Point-in-time snapshot of all conversations, most recent first.
    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.request(|done| SessionCommand::Snapshot { done }).await
    }

    /// Disconnect the realtime channel. Conversations and key material are
    /// retained, so a quick reopen does not need a full reload.
    pub async fn stop(&self) -> Result<()> {
        self.request(|done| SessionCommand::Stop { done }).await
    }

    /// Stop and wipe all key material.
    pub async fn logout(&self) -> Result<()> {
        self.request(|done| SessionCommand::Logout { done }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(done_tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        done_rx.await.map_err(|_| ClientError::SessionClosed)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct SessionWorker {
    api: Arc<dyn MessagingApi>,
    keystore: Arc<CryptoKeyStore>,
    crypto: ConversationCrypto,
    channel: RealtimeChannel,
    store: ConversationStore,
    events: mpsc::Sender<SessionEvent>,
    page_size: u32,
    profile: UserProfile,
    connected_once: bool,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut channel_events: mpsc::Receiver<ChannelEvent>,
    ) {
        // after stop() the channel is gone but the loop keeps serving
        // snapshots, so a quick reopen does not need a full reload
        let mut channel_open = true;
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        self.channel.disconnect().await;
                        break;
                    }
                },
                event = channel_events.recv(), if channel_open => match event {
                    Some(ChannelEvent::Status(state)) => self.handle_status(state).await,
                    Some(ChannelEvent::Frame(frame)) => self.handle_frame(frame).await,
                    None => channel_open = false,
                },
            }
        }
        debug!("Session event loop stopped");
    }

    /// Returns true when the loop should stop.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Select { id, done } => {
                let _ = done.send(self.select_conversation(id).await);
            }
            SessionCommand::SendMessage {
                conversation,
                content,
                kind,
                reply_to,
                done,
            } => {
                let _ = done.send(self.send_message(conversation, content, kind, reply_to).await);
            }
            SessionCommand::SendFile {
                conversation,
                file_name,
                data,
                done,
            } => {
                let _ = done.send(self.send_file(conversation, file_name, data).await);
            }
            SessionCommand::LoadHistoryPage {
                conversation,
                page,
                done,
            } => {
                let _ = done.send(self.load_history_page(&conversation, page).await);
            }
            SessionCommand::CreateConversation {
                participants,
                kind,
                title,
                done,
            } => {
                let _ = done.send(self.create_conversation(participants, kind, title).await);
            }
            SessionCommand::SearchUsers { query, done } => {
                let _ = done.send(self.api.search_users(&query).await.map_err(Into::into));
            }
            SessionCommand::SetTyping { is_typing } => {
                if let Some(id) = self.store.active().cloned() {
                    let _ = self
                        .channel
                        .send(ClientFrame::TypingIndicator {
                            conversation_id: id,
                            is_typing,
                        })
                        .await;
                }
            }
            SessionCommand::Refresh { done } => {
                let _ = done.send(self.refresh().await);
            }
            SessionCommand::Snapshot { done } => {
                let _ = done.send(self.store.conversations().to_vec());
            }
            SessionCommand::Stop { done } => {
                self.channel.disconnect().await;
                let _ = done.send(());
            }
            SessionCommand::Logout { done } => {
                self.channel.disconnect().await;
                self.keystore.wipe();
                if let Err(e) = self.api.logout().await {
                    debug!(error = %e, "Server-side logout failed");
                }
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    // -- channel events -----------------------------------------------------

    async fn handle_status(&mut self, state: ConnectionState) {
        self.emit(SessionEvent::ConnectionChanged(state)).await;
        if state != ConnectionState::Connected {
            return;
        }
        if !self.connected_once {
            self.connected_once = true;
            return;
        }

        // regained connection: resync anything we missed and rejoin the room
        info!("Connection regained; resyncing");
        if let Err(e) = self.refresh().await {
            self.emit_error(e).await;
            return;
        }
        if let Some(active) = self.store.active().cloned() {
            let _ = self
                .channel
                .send(ClientFrame::JoinConversation {
                    conversation_id: active.clone(),
                })
                .await;
            if let Err(e) = self.load_history_page(&active, 1).await {
                self.emit_error(e).await;
            }
        }
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::NewMessage(push) => self.handle_new_message(push).await,
            ServerFrame::NewMessageNotification {
                conversation_id,
                conversation_name,
                sender_name,
                message_preview,
                ..
            } => {
                if self.store.active() != Some(&conversation_id) {
                    self.emit(SessionEvent::Notification {
                        title: format!("{sender_name} ({conversation_name})"),
                        body: message_preview,
                    })
                    .await;
                }
            }
            ServerFrame::ConversationUpdated {
                conversation_id,
                update_type,
                data,
            } => {
                self.handle_conversation_updated(conversation_id, update_type, data)
                    .await
            }
            ServerFrame::ReadStatusUpdate {
                message_id,
                conversation_id,
                ..
            } => {
                if self.store.apply_read_receipt(&conversation_id, &message_id) {
                    self.emit(SessionEvent::MessageUpdated {
                        conversation_id,
                        message_id,
                    })
                    .await;
                }
            }
            ServerFrame::TypingIndicator {
                conversation_id,
                user_id,
                user_name,
                is_typing,
            } => {
                if &user_id == self.store.current_user() {
                    return;
                }
                if self.store.set_typing(&conversation_id, user_id.clone(), is_typing) {
                    self.emit(SessionEvent::TypingChanged {
                        conversation_id,
                        user_id,
                        user_name,
                        is_typing,
                    })
                    .await;
                }
            }
            ServerFrame::Error { message } => {
                warn!(%message, "Server reported an error");
                self.emit(SessionEvent::Error { message }).await;
            }
            ServerFrame::ConnectionEstablished {} => {
                debug!("Server acknowledged hello");
            }
            ServerFrame::Unknown => {}
        }
    }

    async fn handle_new_message(&mut self, push: NewMessage) {
        let mut msg = message_from_push(push, self.store.current_user());
        msg.body = self
            .crypto
            .decrypt(&msg.conversation_id, &msg.encrypted_content)
            .await;
        let conversation_id = msg.conversation_id.clone();
        let from_me = &msg.sender_id == self.store.current_user();

        let mut outcome = self.store.apply_incoming(msg.clone());
        if outcome == ApplyOutcome::UnknownConversation {
            // a conversation created since our last list load
            if let Err(e) = self.refresh().await {
                self.emit_error(e).await;
                return;
            }
            outcome = self.store.apply_incoming(msg.clone());
        }

        match outcome {
            ApplyOutcome::Inserted => {
                if let Some(stored) = self
                    .store
                    .conversation(&conversation_id)
                    .and_then(|c| c.message(&msg.id))
                    .cloned()
                {
                    self.emit(SessionEvent::MessageAppended {
                        conversation_id: conversation_id.clone(),
                        message: stored,
                    })
                    .await;
                }
                let active = self.store.active() == Some(&conversation_id);
                if active && !from_me {
                    // auto receipt while the user is looking at the room
                    for message_id in self.store.mark_read(&conversation_id).unwrap_or_default()
                    {
                        let _ = self
                            .channel
                            .send(ClientFrame::MarkAsRead { message_id })
                            .await;
                    }
                }
                self.emit_unread(&conversation_id).await;
            }
            ApplyOutcome::Confirmed => {
                self.emit(SessionEvent::MessageUpdated {
                    conversation_id,
                    message_id: msg.id,
                })
                .await;
            }
            ApplyOutcome::Duplicate => {}
            ApplyOutcome::UnknownConversation => {
                warn!(conversation = %conversation_id, "Message for unknown conversation after reload");
            }
        }
    }

    async fn handle_conversation_updated(
        &mut self,
        conversation_id: ConversationId,
        update_type: String,
        data: serde_json::Value,
    ) {
        #[derive(Deserialize)]
        struct PresenceData {
            user_id: UserId,
            is_online: bool,
            #[serde(default)]
            last_seen: Option<DateTime<Utc>>,
        }

        if update_type == "presence" {
            if let Ok(p) = serde_json::from_value::<PresenceData>(data) {
                if self.store.set_presence(&p.user_id, p.is_online, p.last_seen) {
                    self.emit(SessionEvent::PresenceChanged {
                        user_id: p.user_id,
                        online: p.is_online,
                    })
                    .await;
                }
                return;
            }
        }

        debug!(conversation = %conversation_id, %update_type, "Conversation updated; reloading list");
        if let Err(e) = self.refresh().await {
            self.emit_error(e).await;
        }
    }

    // -- operations ---------------------------------------------------------

    async fn select_conversation(&mut self, id: ConversationId) -> Result<()> {
        if self.store.conversation(&id).is_none() {
            return Err(ClientError::UnknownConversation(id));
        }
        if let Some(prev) = self.store.active().cloned() {
            if prev != id {
                let _ = self
                    .channel
                    .send(ClientFrame::LeaveConversation {
                        conversation_id: prev,
                    })
                    .await;
            }
        }
        self.store.set_active(Some(id.clone()));
        // NotConnected here is fine; the room is rejoined on reconnect
        let _ = self
            .channel
            .send(ClientFrame::JoinConversation {
                conversation_id: id.clone(),
            })
            .await;

        let loaded = self
            .store
            .conversation(&id)
            .map(|c| c.history_loaded)
            .unwrap_or(false);
        if !loaded {
            self.load_history_page(&id, 1).await?;
        } else {
            self.decrypt_pending(&id).await;
        }

        for message_id in self.store.mark_read(&id)? {
            let _ = self
                .channel
                .send(ClientFrame::MarkAsRead { message_id })
                .await;
        }
        self.emit(SessionEvent::ConversationsRefreshed).await;
        self.emit_unread(&id).await;
        Ok(())
    }

    async fn load_history_page(&mut self, id: &ConversationId, page: u32) -> Result<usize> {
        let dtos = self.api.list_messages(id, page, self.page_size).await?;
        let me = self.store.current_user().clone();
        let messages = dtos
            .into_iter()
            .map(|dto| message_from_dto(dto, &me))
            .collect();
        let added = self.store.merge_history(id, messages)?;
        debug!(conversation = %id, page, added, "History page merged");
        self.decrypt_pending(id).await;
        Ok(added)
    }

    /// Decrypt every message still carrying only ciphertext.
    async fn decrypt_pending(&mut self, id: &ConversationId) {
        let pending: Vec<(MessageId, String)> = self
            .store
            .conversation(id)
            .map(|c| {
                c.messages
                    .iter()
                    .filter(|m| m.body == MessageBody::Encrypted)
                    .map(|m| (m.id.clone(), m.encrypted_content.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (message_id, ciphertext) in pending {
            let body = self.crypto.decrypt(id, &ciphertext).await;
            if self.store.attach_plaintext(id, &message_id, body).is_ok() {
                self.emit(SessionEvent::MessageUpdated {
                    conversation_id: id.clone(),
                    message_id,
                })
                .await;
            }
        }
    }

    async fn send_message(
        &mut self,
        conversation: ConversationId,
        content: String,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if self.store.conversation(&conversation).is_none() {
            return Err(ClientError::UnknownConversation(conversation));
        }

        let encrypted = self.crypto.encrypt(&conversation, trimmed.as_bytes()).await?;
        let token = Uuid::new_v4();
        let mut msg = Message::optimistic(
            token,
            conversation.clone(),
            self.profile.id.clone(),
            self.profile.name(),
            trimmed,
            encrypted.clone(),
            kind,
        );
        msg.reply_to = reply_to.clone();
        self.store.insert_optimistic(msg.clone())?;
        self.emit(SessionEvent::MessageAppended {
            conversation_id: conversation.clone(),
            message: msg.clone(),
        })
        .await;

        let frame = ClientFrame::SendMessage {
            conversation_id: conversation,
            client_token: token,
            encrypted_content: encrypted,
            message_type: kind,
            reply_to_id: reply_to,
        };
        if let Err(e) = self.channel.send(frame).await {
            warn!(error = %e, "Websocket send failed");
            if let Some((conversation_id, message_id)) = self.store.mark_send_failed(token) {
                self.emit(SessionEvent::MessageUpdated {
                    conversation_id,
                    message_id,
                })
                .await;
            }
            return Err(ClientError::Send);
        }
        Ok(msg.id)
    }

    async fn send_file(
        &mut self,
        conversation: ConversationId,
        file_name: String,
        data: Vec<u8>,
    ) -> Result<MessageId> {
        let upload = self.api.upload_attachment(&file_name, data).await?;
        let descriptor = FileAttachment {
            file_id: upload.file_id,
            file_name: upload.file_name,
            file_size: upload.file_size,
        };
        let content = serde_json::to_string(&descriptor)
            .map_err(|e| ClientError::Network(NetError::Protocol(e.to_string())))?;
        self.send_message(conversation, content, MessageKind::File, None)
            .await
    }

    async fn create_conversation(
        &mut self,
        participants: Vec<UserId>,
        kind: ConversationKind,
        title: Option<String>,
    ) -> Result<ConversationId> {
        let dto = self
            .api
            .create_conversation(&participants, kind, title.as_deref())
            .await?;
        let id = dto.id.clone();
        self.refresh().await?;
        Ok(id)
    }

    async fn refresh(&mut self) -> Result<()> {
        let dtos = self.api.list_conversations().await?;
        let conversations = dtos.into_iter().map(conversation_from_dto).collect();
        self.store.replace_conversations(conversations);
        self.emit(SessionEvent::ConversationsRefreshed).await;
        Ok(())
    }

    // -- helpers ------------------------------------------------------------

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }

    async fn emit_error(&self, e: ClientError) {
        self.emit(SessionEvent::Error {
            message: e.to_string(),
        })
        .await;
    }

    async fn emit_unread(&self, id: &ConversationId) {
        let unread = self
            .store
            .conversation(id)
            .map(|c| c.unread_count)
            .unwrap_or(0);
        self.emit(SessionEvent::UnreadChanged {
            conversation_id: id.clone(),
            unread,
            total: self.store.total_unread(),
        })
        .await;
    }
}

// ---------------------------------------------------------------------------
// DTO conversions
// ---------------------------------------------------------------------------

fn user_from_participant(p: ParticipantDto) -> User {
    User {
        display_name: p.name().to_string(),
        id: p.user_id,
        username: p.username,
        online: p.is_online,
        last_seen: p.last_seen,
        key_fingerprint: p.key_fingerprint,
    }
}

fn conversation_from_dto(dto: ConversationDto) -> Conversation {
    let mut conv = Conversation::new(dto.id, dto.conversation_type);
    conv.title = dto.title.filter(|t| !t.is_empty());
    conv.participants = dto.participants.into_iter().map(user_from_participant).collect();
    conv.unread_count = dto.unread_count;
    conv.last_activity = dto.last_message_at;
    conv
}

fn message_from_dto(dto: MessageDto, me: &UserId) -> Message {
    let outgoing = &dto.sender_id == me;
    Message {
        id: dto.id,
        client_token: None,
        conversation_id: dto.conversation_id,
        sender_id: dto.sender_id,
        sender_name: dto.sender_name,
        encrypted_content: dto.encrypted_content,
        body: MessageBody::Encrypted,
        kind: dto.message_type,
        timestamp: dto.timestamp,
        read: dto.is_read || outgoing,
        reply_to: dto.reply_to_id,
        outgoing,
        delivery: Delivery::Sent,
    }
}

fn message_from_push(push: NewMessage, me: &UserId) -> Message {
    let outgoing = &push.sender_id == me;
    Message {
        id: push.message_id,
        client_token: push.client_token,
        conversation_id: push.conversation_id,
        sender_id: push.sender_id,
        sender_name: push.sender_name,
        encrypted_content: push.encrypted_content,
        body: MessageBody::Encrypted,
        kind: push.message_type,
        timestamp: push.timestamp,
        read: outgoing,
        reply_to: push.reply_to_id,
        outgoing,
        delivery: Delivery::Sent,
    }
}
