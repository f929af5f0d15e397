//! Key material management.
//!
//! One `CryptoKeyStore` per session. It holds the unlocked user keypair and
//! caches of peer public keys and conversation keys, all in memory only.
//! Network access goes through the [`KeyDirectory`] seam so tests can
//! substitute a fake for the REST client.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::Mutex;
use tracing::{debug, info};
use x25519_dalek::PublicKey;

use drlab_net::{ApiClient, NetError, ParticipantDto, UserKeyPairDto};
use drlab_shared::crypto::{self, SymmetricKey};
use drlab_shared::error::KeyError;
use drlab_shared::keys::{self, UserKeyPair};
use drlab_shared::types::{ConversationId, UserId};

use crate::error::{ClientError, Result};

/// Server-side key distribution, as the keystore needs it.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// A user's key record. Private blob and salt only for the caller's own.
    async fn user_keys(&self, user: &UserId) -> std::result::Result<UserKeyPairDto, NetError>;

    /// The caller's wrapped copy of the conversation key, if published.
    async fn conversation_key(
        &self,
        conversation: &ConversationId,
    ) -> std::result::Result<Option<String>, NetError>;

    /// Publish one wrapped copy per participant.
    async fn publish_conversation_keys(
        &self,
        conversation: &ConversationId,
        keys: &HashMap<UserId, String>,
    ) -> std::result::Result<(), NetError>;

    async fn participants(
        &self,
        conversation: &ConversationId,
    ) -> std::result::Result<Vec<ParticipantDto>, NetError>;
}

#[async_trait]
impl KeyDirectory for ApiClient {
    async fn user_keys(&self, user: &UserId) -> std::result::Result<UserKeyPairDto, NetError> {
        ApiClient::user_keys(self, user).await
    }

    async fn conversation_key(
        &self,
        conversation: &ConversationId,
    ) -> std::result::Result<Option<String>, NetError> {
        ApiClient::conversation_key(self, conversation).await
    }

    async fn publish_conversation_keys(
        &self,
        conversation: &ConversationId,
        keys: &HashMap<UserId, String>,
    ) -> std::result::Result<(), NetError> {
        ApiClient::publish_conversation_keys(self, conversation, keys).await
    }

    async fn participants(
        &self,
        conversation: &ConversationId,
    ) -> std::result::Result<Vec<ParticipantDto>, NetError> {
        ApiClient::participants(self, conversation).await
    }
}

/// In-memory key store for one logged-in user.
pub struct CryptoKeyStore {
    directory: Arc<dyn KeyDirectory>,
    user_id: UserId,
    keypair: RwLock<Option<UserKeyPair>>,
    peer_keys: RwLock<HashMap<UserId, PublicKey>>,
    conversation_keys: RwLock<HashMap<ConversationId, SymmetricKey>>,
    /// Per-conversation gates so concurrent callers share one provisioning
    /// round trip instead of racing to generate competing keys.
    inflight: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl CryptoKeyStore {
    pub fn new(directory: Arc<dyn KeyDirectory>, user_id: UserId) -> Self {
        Self {
            directory,
            user_id,
            keypair: RwLock::new(None),
            peer_keys: RwLock::new(HashMap::new()),
            conversation_keys: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Fetch the server-held private key blob, decrypt it with the password,
    /// and keep the keypair for the session. Returns the key fingerprint.
    pub async fn unlock(&self, password: &str) -> Result<String> {
        let dto = self
            .directory
            .user_keys(&self.user_id)
            .await
            .map_err(|e| match e {
                NetError::Auth => ClientError::Auth,
                _ => ClientError::KeyUnlock,
            })?;

        let (blob, salt) = match (dto.encrypted_private_key, dto.salt) {
            (Some(blob), Some(salt)) => (blob, salt),
            _ => return Err(ClientError::KeyUnlock),
        };
        let keypair = keys::unlock_private_key(&blob, password, &salt)
            .map_err(|_| ClientError::KeyUnlock)?;

        // the decrypted secret must correspond to the published public key
        if !dto.public_key.is_empty() && keypair.public_key_b64() != dto.public_key {
            return Err(ClientError::KeyUnlock);
        }

        let fingerprint = keypair.fingerprint();
        self.cache_peer(&self.user_id, keypair.public_key());
        *self.keypair.write().unwrap_or_else(|e| e.into_inner()) = Some(keypair);
        info!(user = %self.user_id, %fingerprint, "Private key unlocked");
        Ok(fingerprint)
    }

    /// The unlocked keypair; `KeyUnlock` before a successful [`unlock`].
    pub fn keypair(&self) -> Result<UserKeyPair> {
        self.keypair
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ClientError::KeyUnlock)
    }

    /// A user's public key, cache-or-fetch.
    pub async fn public_key(&self, user: &UserId) -> Result<PublicKey> {
        if let Some(key) = self
            .peer_keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user)
        {
            return Ok(*key);
        }
        let dto = self
            .directory
            .user_keys(user)
            .await
            .map_err(|e| key_unavailable(user, e))?;
        let key = keys::public_key_from_b64(&dto.public_key)
            .map_err(|_| ClientError::KeyFetch(format!("malformed public key for {user}")))?;
        self.cache_peer(user, key);
        Ok(key)
    }

    /// The conversation's symmetric key.
    ///
    /// Resolution order: local cache, then the server-held wrapped copy,
    /// then generate-and-distribute (first writer in a fresh conversation).
    /// A fetch failure propagates; it never triggers generation, which would
    /// silently fork the conversation key.
    pub async fn conversation_key(&self, conversation: &ConversationId) -> Result<SymmetricKey> {
        if let Some(key) = self.cached_conversation_key(conversation) {
            return Ok(key);
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(conversation.clone()).or_default().clone()
        };
        let _guard = gate.lock().await;

        // a concurrent caller may have finished while we waited
        if let Some(key) = self.cached_conversation_key(conversation) {
            return Ok(key);
        }

        let key = match self
            .directory
            .conversation_key(conversation)
            .await
            .map_err(|e| ClientError::KeyFetch(format!("conversation {conversation}: {e}")))?
        {
            Some(wrapped_b64) => {
                let blob = BASE64
                    .decode(&wrapped_b64)
                    .map_err(|_| KeyError::UnwrapFailed)?;
                let key = keys::unwrap_key(&self.keypair()?, &blob)?;
                debug!(%conversation, "Unwrapped existing conversation key");
                key
            }
            None => self.provision_key(conversation).await?,
        };

        self.conversation_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation.clone(), key);
        Ok(key)
    }

    /// Generate a fresh key and publish one wrapped copy per participant,
    /// our own included.
    async fn provision_key(&self, conversation: &ConversationId) -> Result<SymmetricKey> {
        let participants = self
            .directory
            .participants(conversation)
            .await
            .map_err(|e| ClientError::KeyFetch(format!("conversation {conversation}: {e}")))?;

        let key = crypto::generate_symmetric_key();
        let own = self.keypair()?;
        let mut wrapped = HashMap::new();
        for p in &participants {
            let public = if p.user_id == self.user_id {
                own.public_key()
            } else {
                self.public_key(&p.user_id).await?
            };
            let blob = keys::wrap_key_for(&public, &key)?;
            wrapped.insert(p.user_id.clone(), BASE64.encode(blob));
        }
        // even on a roster that omits us, we must be able to read our own
        // messages back
        if !wrapped.contains_key(&self.user_id) {
            let blob = keys::wrap_key_for(&own.public_key(), &key)?;
            wrapped.insert(self.user_id.clone(), BASE64.encode(blob));
        }

        self.directory
            .publish_conversation_keys(conversation, &wrapped)
            .await
            .map_err(|e| ClientError::KeyFetch(format!("conversation {conversation}: {e}")))?;

        info!(%conversation, recipients = wrapped.len(), "Provisioned conversation key");
        Ok(key)
    }

    /// Drop all key material. Used at logout.
    pub fn wipe(&self) {
        *self.keypair.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.peer_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.conversation_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(user = %self.user_id, "Key store wiped");
    }

    fn cached_conversation_key(&self, conversation: &ConversationId) -> Option<SymmetricKey> {
        self.conversation_keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation)
            .copied()
    }

    fn cache_peer(&self, user: &UserId, key: PublicKey) {
        self.peer_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.clone(), key);
    }
}

fn key_unavailable(user: &UserId, e: NetError) -> ClientError {
    match e {
        NetError::Auth => ClientError::Auth,
        other => ClientError::KeyFetch(format!("no key record for {user}: {other}")),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const SALT: &[u8] = b"fake-server-salt";

    /// In-memory stand-in for the server's key distribution endpoints.
    pub struct FakeDirectory {
        me: UserId,
        users: StdMutex<HashMap<UserId, UserKeyPairDto>>,
        published: StdMutex<HashMap<ConversationId, HashMap<UserId, String>>>,
        roster: StdMutex<HashMap<ConversationId, Vec<UserId>>>,
        pub key_fetches: AtomicUsize,
        pub publishes: AtomicUsize,
        pub fail_key_fetch: AtomicBool,
        delay: Option<Duration>,
    }

    impl FakeDirectory {
        pub fn new(me: &str) -> Self {
            Self {
                me: UserId::new(me),
                users: StdMutex::new(HashMap::new()),
                published: StdMutex::new(HashMap::new()),
                roster: StdMutex::new(HashMap::new()),
                key_fetches: AtomicUsize::new(0),
                publishes: AtomicUsize::new(0),
                fail_key_fetch: AtomicBool::new(false),
                delay: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Register a user with a password-sealed private key, as the server
        /// would hold after registration. Returns the generated keypair.
        pub fn add_user(&self, id: &str, password: &str) -> UserKeyPair {
            let keypair = UserKeyPair::generate();
            let sealed = keys::seal_private_key(&keypair, password, SALT).unwrap();
            self.users.lock().unwrap().insert(
                UserId::new(id),
                UserKeyPairDto {
                    user_id: UserId::new(id),
                    public_key: keypair.public_key_b64(),
                    encrypted_private_key: Some(sealed),
                    salt: Some(BASE64.encode(SALT)),
                },
            );
            keypair
        }

        /// Register a peer whose record carries only the public half.
        pub fn add_peer(&self, id: &str) -> UserKeyPair {
            let keypair = UserKeyPair::generate();
            self.users.lock().unwrap().insert(
                UserId::new(id),
                UserKeyPairDto {
                    user_id: UserId::new(id),
                    public_key: keypair.public_key_b64(),
                    encrypted_private_key: None,
                    salt: None,
                },
            );
            keypair
        }

        pub fn set_roster(&self, conversation: &str, users: &[&str]) {
            self.roster.lock().unwrap().insert(
                ConversationId::new(conversation),
                users.iter().map(|u| UserId::new(*u)).collect(),
            );
        }

        pub fn publish_for(&self, conversation: &str, user: &str, wrapped_b64: String) {
            self.published
                .lock()
                .unwrap()
                .entry(ConversationId::new(conversation))
                .or_default()
                .insert(UserId::new(user), wrapped_b64);
        }

        pub fn published_copy(&self, conversation: &str, user: &str) -> Option<String> {
            self.published
                .lock()
                .unwrap()
                .get(&ConversationId::new(conversation))?
                .get(&UserId::new(user))
                .cloned()
        }
    }

    #[async_trait]
    impl KeyDirectory for FakeDirectory {
        async fn user_keys(
            &self,
            user: &UserId,
        ) -> std::result::Result<UserKeyPairDto, NetError> {
            self.users.lock().unwrap().get(user).cloned().ok_or(NetError::Api {
                status: 404,
                message: "no such user".into(),
            })
        }

        async fn conversation_key(
            &self,
            conversation: &ConversationId,
        ) -> std::result::Result<Option<String>, NetError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.key_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_key_fetch.load(Ordering::SeqCst) {
                return Err(NetError::Connection("key service down".into()));
            }
            Ok(self
                .published
                .lock()
                .unwrap()
                .get(conversation)
                .and_then(|m| m.get(&self.me))
                .cloned())
        }

        async fn publish_conversation_keys(
            &self,
            conversation: &ConversationId,
            keys: &HashMap<UserId, String>,
        ) -> std::result::Result<(), NetError> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            self.published
                .lock()
                .unwrap()
                .insert(conversation.clone(), keys.clone());
            Ok(())
        }

        async fn participants(
            &self,
            conversation: &ConversationId,
        ) -> std::result::Result<Vec<ParticipantDto>, NetError> {
            let roster = self.roster.lock().unwrap();
            let users = roster.get(conversation).cloned().unwrap_or_default();
            Ok(users
                .into_iter()
                .map(|user_id| ParticipantDto {
                    username: user_id.to_string(),
                    user_id,
                    display_name: String::new(),
                    is_online: false,
                    last_seen: None,
                    key_fingerprint: None,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeDirectory;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn keystore(directory: FakeDirectory, me: &str) -> CryptoKeyStore {
        CryptoKeyStore::new(Arc::new(directory), UserId::new(me))
    }

    #[tokio::test]
    async fn test_unlock_and_fingerprint() {
        let directory = FakeDirectory::new("alice");
        let keypair = directory.add_user("alice", "hunter2");
        let store = keystore(directory, "alice");

        let fingerprint = store.unlock("hunter2").await.unwrap();
        assert_eq!(fingerprint, keypair.fingerprint());
        assert_eq!(
            store.keypair().unwrap().public_key_b64(),
            keypair.public_key_b64()
        );
    }

    #[tokio::test]
    async fn test_unlock_wrong_password() {
        let directory = FakeDirectory::new("alice");
        directory.add_user("alice", "hunter2");
        let store = keystore(directory, "alice");

        assert!(matches!(
            store.unlock("hunter3").await,
            Err(ClientError::KeyUnlock)
        ));
        assert!(matches!(store.keypair(), Err(ClientError::KeyUnlock)));
    }

    #[tokio::test]
    async fn test_unlock_without_registered_blob() {
        let directory = FakeDirectory::new("alice");
        directory.add_peer("alice");
        let store = keystore(directory, "alice");

        assert!(matches!(
            store.unlock("hunter2").await,
            Err(ClientError::KeyUnlock)
        ));
    }

    #[tokio::test]
    async fn test_conversation_key_unwraps_published_copy() {
        let directory = FakeDirectory::new("alice");
        let keypair = directory.add_user("alice", "hunter2");

        let expected = crypto::generate_symmetric_key();
        let blob = keys::wrap_key_for(&keypair.public_key(), &expected).unwrap();
        directory.publish_for("conv1", "alice", BASE64.encode(blob));

        let store = keystore(directory, "alice");
        store.unlock("hunter2").await.unwrap();

        let key = store.conversation_key(&ConversationId::new("conv1")).await.unwrap();
        assert_eq!(key, expected);
    }

    #[tokio::test]
    async fn test_fresh_conversation_provisions_for_all_participants() {
        let directory = FakeDirectory::new("alice");
        directory.add_user("alice", "hunter2");
        let bob = directory.add_peer("bob");
        directory.set_roster("conv1", &["alice", "bob"]);
        let directory = Arc::new(directory);

        let store = CryptoKeyStore::new(directory.clone(), UserId::new("alice"));
        store.unlock("hunter2").await.unwrap();

        let key = store.conversation_key(&ConversationId::new("conv1")).await.unwrap();
        assert_eq!(directory.publishes.load(Ordering::SeqCst), 1);

        // bob can unwrap his copy to the very same key
        let bob_copy = directory.published_copy("conv1", "bob").unwrap();
        let blob = BASE64.decode(bob_copy).unwrap();
        let bob_key = keys::unwrap_key(&bob, &blob).unwrap();
        assert_eq!(bob_key, key);
        assert!(directory.published_copy("conv1", "alice").is_some());

        // and a message alice encrypts reads back as plaintext for bob
        let wire = crypto::encrypt_b64(&key, b"hello").unwrap();
        assert_eq!(crypto::decrypt_b64(&bob_key, &wire).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_provisioning() {
        let directory = FakeDirectory::new("alice").with_delay(Duration::from_millis(50));
        directory.add_user("alice", "hunter2");
        directory.set_roster("conv1", &["alice"]);
        let directory = Arc::new(directory);

        let store = Arc::new(CryptoKeyStore::new(
            directory.clone(),
            UserId::new("alice"),
        ));
        store.unlock("hunter2").await.unwrap();

        let id = ConversationId::new("conv1");
        let (a, b, c, d) = tokio::join!(
            store.conversation_key(&id),
            store.conversation_key(&id),
            store.conversation_key(&id),
            store.conversation_key(&id),
        );
        let key = a.unwrap();
        assert_eq!(key, b.unwrap());
        assert_eq!(key, c.unwrap());
        assert_eq!(key, d.unwrap());
        assert_eq!(directory.publishes.load(Ordering::SeqCst), 1);
        assert_eq!(directory.key_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_never_generates() {
        let directory = FakeDirectory::new("alice");
        directory.add_user("alice", "hunter2");
        directory.fail_key_fetch.store(true, Ordering::SeqCst);
        let directory = Arc::new(directory);

        let store = CryptoKeyStore::new(directory.clone(), UserId::new("alice"));
        store.unlock("hunter2").await.unwrap();

        let result = store.conversation_key(&ConversationId::new("conv1")).await;
        assert!(matches!(result, Err(ClientError::KeyFetch(_))));
        assert_eq!(directory.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wipe_drops_everything() {
        let directory = FakeDirectory::new("alice");
        directory.add_user("alice", "hunter2");
        directory.set_roster("conv1", &["alice"]);
        let store = keystore(directory, "alice");
        store.unlock("hunter2").await.unwrap();
        store.conversation_key(&ConversationId::new("conv1")).await.unwrap();

        store.wipe();
        assert!(matches!(store.keypair(), Err(ClientError::KeyUnlock)));
        assert!(matches!(
            store.conversation_key(&ConversationId::new("conv1")).await,
            Err(ClientError::KeyUnlock)
        ));
    }
}
