//! Message-level encryption bound to conversation keys.

use std::sync::Arc;

use tracing::warn;

use drlab_shared::constants::MAX_MESSAGE_SIZE;
use drlab_shared::crypto;
use drlab_shared::types::ConversationId;
use drlab_store::MessageBody;

use crate::error::{ClientError, Result};
use crate::keystore::CryptoKeyStore;

/// What the UI renders in place of a message that failed to decrypt.
pub const DECRYPT_PLACEHOLDER: &str = "Failed to decrypt message";

/// Encrypts and decrypts message content with the owning conversation's key.
#[derive(Clone)]
pub struct ConversationCrypto {
    keystore: Arc<CryptoKeyStore>,
}

impl ConversationCrypto {
    pub fn new(keystore: Arc<CryptoKeyStore>) -> Self {
        Self { keystore }
    }

    /// Encrypt plaintext for a conversation. Produces the base64 wire form
    /// with a fresh nonce per call.
    pub async fn encrypt(&self, conversation: &ConversationId, plaintext: &[u8]) -> Result<String> {
        if plaintext.len() > MAX_MESSAGE_SIZE {
            return Err(ClientError::MessageTooLarge(plaintext.len()));
        }
        let key = self.keystore.conversation_key(conversation).await?;
        crypto::encrypt_b64(&key, plaintext)
            .map_err(|e| ClientError::KeyFetch(e.to_string()))
    }

    /// Decrypt a message body. Never fatal: a missing key, malformed blob,
    /// or failed tag check yields `DecryptFailed` and the message renders as
    /// a placeholder.
    pub async fn decrypt(
        &self,
        conversation: &ConversationId,
        ciphertext_b64: &str,
    ) -> MessageBody {
        let key = match self.keystore.conversation_key(conversation).await {
            Ok(key) => key,
            Err(e) => {
                warn!(%conversation, error = %e, "No key for inbound message");
                return MessageBody::DecryptFailed;
            }
        };
        match crypto::decrypt_b64(&key, ciphertext_b64) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => MessageBody::Plaintext(text),
                Err(_) => {
                    warn!(%conversation, "Decrypted message is not valid UTF-8");
                    MessageBody::DecryptFailed
                }
            },
            Err(_) => {
                warn!(%conversation, "Message failed to decrypt");
                MessageBody::DecryptFailed
            }
        }
    }
}
