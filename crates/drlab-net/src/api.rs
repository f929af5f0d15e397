//! Typed REST client for the DrLab backend.
//!
//! Thin wrapper over `reqwest` with bearer-token state and the endpoint
//! contracts the messaging core depends on: auth, conversations, paginated
//! message history, key distribution, read receipts, user search, and file
//! attachments.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use drlab_shared::types::{ConversationId, ConversationKind, MessageId, MessageKind, UserId};

use crate::error::{NetError, Result};

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Access token, also used for the websocket handshake.
    pub access: String,
    #[serde(default)]
    pub refresh: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

impl UserProfile {
    /// Preferred human-readable name.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDto {
    pub id: ConversationId,
    pub conversation_type: ConversationKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantDto>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantDto {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub key_fingerprint: Option<String>,
}

impl ParticipantDto {
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDto {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub encrypted_content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

/// Key material the server holds for a user. `encrypted_private_key` and
/// `salt` are only present when fetching one's own record.
#[derive(Debug, Clone, Deserialize)]
pub struct UserKeyPairDto {
    pub user_id: UserId,
    pub public_key: String,
    #[serde(default)]
    pub encrypted_private_key: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyEnvelopeDto {
    #[serde(default)]
    encrypted_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishKeysRequest<'a> {
    keys: &'a HashMap<UserId, String>,
}

#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    participant_ids: &'a [UserId],
    conversation_type: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileUploadDto {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client with interior bearer-token state.
///
/// Constructed once per session and shared via `Arc`; `login` stores the
/// access token for all subsequent calls.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut req = self.http.get(self.url(path));
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        check(req.send().await?).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        check(req.send().await?).await
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        let mut req = self.http.post(self.url(path));
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        check_status(req.send().await?).await
    }

    // -- auth ---------------------------------------------------------------

    /// Authenticate and store the access token for subsequent calls.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let resp: LoginResponse = self
            .post_json("/api/auth/login/", &LoginRequest { username, password })
            .await?;
        self.set_token(resp.access.clone());
        Ok(resp)
    }

    pub async fn logout(&self) -> Result<()> {
        // Clear the token even if the server call fails.
        let result = self.post_empty("/api/auth/logout/").await;
        self.clear_token();
        result
    }

    // -- conversations ------------------------------------------------------

    pub async fn list_conversations(&self) -> Result<Vec<ConversationDto>> {
        self.get_json("/api/messaging/conversations/").await
    }

    pub async fn list_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<MessageDto>> {
        self.get_json(&format!(
            "/api/messaging/conversations/{conversation}/messages/?page={page}&page_size={page_size}"
        ))
        .await
    }

    pub async fn create_conversation(
        &self,
        participant_ids: &[UserId],
        kind: ConversationKind,
        title: Option<&str>,
    ) -> Result<ConversationDto> {
        self.post_json(
            "/api/messaging/conversations/",
            &CreateConversationRequest {
                participant_ids,
                conversation_type: kind,
                title,
            },
        )
        .await
    }

    pub async fn participants(&self, conversation: &ConversationId) -> Result<Vec<ParticipantDto>> {
        self.get_json(&format!(
            "/api/messaging/conversations/{conversation}/participants/"
        ))
        .await
    }

    pub async fn mark_message_read(&self, message: &MessageId) -> Result<()> {
        self.post_empty(&format!("/api/messaging/messages/{message}/read/"))
            .await
    }

    // -- keys ---------------------------------------------------------------

    pub async fn user_keys(&self, user: &UserId) -> Result<UserKeyPairDto> {
        self.get_json(&format!("/api/users/{user}/keys/")).await
    }

    /// Fetch the caller's wrapped copy of the conversation key, if any
    /// participant has published one yet.
    pub async fn conversation_key(&self, conversation: &ConversationId) -> Result<Option<String>> {
        let envelope: KeyEnvelopeDto = self
            .get_json(&format!(
                "/api/messaging/conversations/{conversation}/keys/"
            ))
            .await?;
        Ok(envelope.encrypted_key)
    }

    /// Publish one wrapped copy of the conversation key per participant.
    pub async fn publish_conversation_keys(
        &self,
        conversation: &ConversationId,
        keys: &HashMap<UserId, String>,
    ) -> Result<()> {
        let mut req = self
            .http
            .post(self.url(&format!(
                "/api/messaging/conversations/{conversation}/keys/"
            )))
            .json(&PublishKeysRequest { keys });
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        check_status(req.send().await?).await
    }

    // -- users --------------------------------------------------------------

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>> {
        let mut req = self
            .http
            .get(self.url("/api/users/"))
            .query(&[("search", query)]);
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        check(req.send().await?).await
    }

    // -- attachments --------------------------------------------------------

    pub async fn upload_attachment(&self, file_name: &str, data: Vec<u8>) -> Result<FileUploadDto> {
        let mut req = self
            .http
            .post(self.url("/api/messaging/attachments/"))
            .query(&[("file_name", file_name)])
            .body(data);
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        check(req.send().await?).await
    }

    pub async fn download_attachment(&self, file_id: &str) -> Result<Vec<u8>> {
        let mut req = self
            .http
            .get(self.url(&format!("/api/messaging/attachments/{file_id}/")));
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NetError::Auth);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(NetError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

async fn check<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(NetError::Auth);
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(NetError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}

async fn check_status(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(NetError::Auth);
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(NetError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = ApiClient::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.url("/api/users/"), "http://localhost:8000/api/users/");
    }

    #[test]
    fn test_message_dto_defaults() {
        let dto: MessageDto = serde_json::from_str(
            r#"{
                "id": "m-1",
                "conversation_id": "conv1",
                "sender_id": "u-1",
                "encrypted_content": "AAECAw==",
                "timestamp": "2025-06-01T10:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(dto.message_type, MessageKind::Text);
        assert!(!dto.is_read);
        assert!(dto.reply_to_id.is_none());
    }

    #[test]
    fn test_key_envelope_absent_key() {
        let envelope: KeyEnvelopeDto = serde_json::from_str("{}").unwrap();
        assert!(envelope.encrypted_key.is_none());

        let envelope: KeyEnvelopeDto =
            serde_json::from_str(r#"{"encrypted_key": null}"#).unwrap();
        assert!(envelope.encrypted_key.is_none());
    }
}
