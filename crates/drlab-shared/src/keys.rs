//! User keypairs and conversation-key wrapping.
//!
//! Each user holds one x25519 keypair. The private half lives on the server
//! as a password-sealed blob: an Argon2id key derived from the password and
//! a server-supplied salt decrypts it at login. Conversation keys are
//! distributed as one wrapped copy per participant, sealed to that
//! participant's public key with an ephemeral-static ECDH construction.

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_KEY_WRAP, NONCE_SIZE, PUBKEY_SIZE};
use crate::crypto::{self, SymmetricKey};
use crate::error::KeyError;

/// The current user's asymmetric keypair. Held in memory only; the secret
/// half zeroizes on drop.
#[derive(Clone)]
pub struct UserKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl UserKeyPair {
    /// Generate a fresh random keypair (used at account registration).
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// Short BLAKE3 fingerprint of the public key, for display and
    /// out-of-band verification.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public)
    }
}

/// Fingerprint of any public key (first 8 bytes of BLAKE3, hex).
pub fn fingerprint(public: &PublicKey) -> String {
    let hash = blake3::hash(public.as_bytes());
    hex::encode(&hash.as_bytes()[..8])
}

pub fn public_key_from_b64(encoded: &str) -> Result<PublicKey, KeyError> {
    let bytes = BASE64.decode(encoded).map_err(|_| KeyError::UnwrapFailed)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::UnwrapFailed)?;
    Ok(PublicKey::from(arr))
}

/// Wrap a conversation key for one participant.
///
/// Output layout: `ephemeral_pub(32) || nonce(24) || ciphertext`.
pub fn wrap_key_for(recipient: &PublicKey, key: &SymmetricKey) -> Result<Vec<u8>, KeyError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);

    let wrap_key = derive_wrap_key(shared.as_bytes(), &ephemeral_pub, recipient);
    let sealed = crypto::encrypt(&wrap_key, key).map_err(|_| KeyError::WrapFailed)?;

    let mut out = Vec::with_capacity(PUBKEY_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Unwrap a conversation key sealed to our keypair.
pub fn unwrap_key(keypair: &UserKeyPair, blob: &[u8]) -> Result<SymmetricKey, KeyError> {
    if blob.len() < PUBKEY_SIZE + NONCE_SIZE {
        return Err(KeyError::UnwrapFailed);
    }

    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&blob[..PUBKEY_SIZE]);
    let ephemeral_pub = PublicKey::from(ephemeral_bytes);

    let shared = keypair.secret.diffie_hellman(&ephemeral_pub);
    let wrap_key = derive_wrap_key(shared.as_bytes(), &ephemeral_pub, &keypair.public);

    let key_bytes = crypto::decrypt(&wrap_key, &blob[PUBKEY_SIZE..])
        .map_err(|_| KeyError::UnwrapFailed)?;
    key_bytes.try_into().map_err(|_| KeyError::UnwrapFailed)
}

// BLAKE3 KDF with domain separation; binds both public keys into the
// wrapping key so a blob cannot be replayed toward another recipient.
fn derive_wrap_key(
    shared_secret: &[u8],
    ephemeral_pub: &PublicKey,
    recipient_pub: &PublicKey,
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_KEY_WRAP);
    hasher.update(shared_secret);
    hasher.update(ephemeral_pub.as_bytes());
    hasher.update(recipient_pub.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Derive the private-key wrapping key from a password and server salt.
/// Argon2id with default parameters; deliberately slow.
pub fn derive_password_key(password: &str, salt: &[u8]) -> Result<SymmetricKey, KeyError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|_| KeyError::UnlockFailed)?;
    Ok(key)
}

/// Decrypt and parse the server-held private key blob.
///
/// `encrypted_b64` is `base64(nonce || ciphertext)` of the 32-byte x25519
/// secret, sealed under the password-derived key. A wrong password fails
/// the AEAD tag check and surfaces as `UnlockFailed`.
pub fn unlock_private_key(
    encrypted_b64: &str,
    password: &str,
    salt_b64: &str,
) -> Result<UserKeyPair, KeyError> {
    let blob = BASE64
        .decode(encrypted_b64)
        .map_err(|_| KeyError::UnlockFailed)?;
    let salt = BASE64.decode(salt_b64).map_err(|_| KeyError::UnlockFailed)?;

    let key = derive_password_key(password, &salt)?;
    let secret = crypto::decrypt(&key, &blob).map_err(|_| KeyError::UnlockFailed)?;
    let bytes: [u8; 32] = secret.try_into().map_err(|_| KeyError::UnlockFailed)?;

    Ok(UserKeyPair::from_secret_bytes(bytes))
}

/// Seal a private key under a password (registration and tests).
pub fn seal_private_key(
    keypair: &UserKeyPair,
    password: &str,
    salt: &[u8],
) -> Result<String, KeyError> {
    let key = derive_password_key(password, salt)?;
    let sealed =
        crypto::encrypt(&key, &keypair.secret.to_bytes()).map_err(|_| KeyError::WrapFailed)?;
    Ok(BASE64.encode(sealed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_symmetric_key;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let recipient = UserKeyPair::generate();
        let conversation_key = generate_symmetric_key();

        let blob = wrap_key_for(&recipient.public_key(), &conversation_key).unwrap();
        let unwrapped = unwrap_key(&recipient, &blob).unwrap();

        assert_eq!(unwrapped, conversation_key);
    }

    #[test]
    fn test_unwrap_with_wrong_keypair_fails() {
        let recipient = UserKeyPair::generate();
        let other = UserKeyPair::generate();
        let conversation_key = generate_symmetric_key();

        let blob = wrap_key_for(&recipient.public_key(), &conversation_key).unwrap();
        assert!(unwrap_key(&other, &blob).is_err());
    }

    #[test]
    fn test_unwrap_truncated_blob_fails() {
        let recipient = UserKeyPair::generate();
        assert!(unwrap_key(&recipient, &[0u8; 10]).is_err());
    }

    #[test]
    fn test_seal_unlock_roundtrip() {
        let keypair = UserKeyPair::generate();
        let salt = b"server-salt-0001";

        let sealed = seal_private_key(&keypair, "hunter2", salt).unwrap();
        let unlocked =
            unlock_private_key(&sealed, "hunter2", &BASE64.encode(salt)).unwrap();

        assert_eq!(unlocked.public_key_b64(), keypair.public_key_b64());
    }

    #[test]
    fn test_unlock_wrong_password_fails() {
        let keypair = UserKeyPair::generate();
        let salt = b"server-salt-0001";

        let sealed = seal_private_key(&keypair, "hunter2", salt).unwrap();
        let result = unlock_private_key(&sealed, "hunter3", &BASE64.encode(salt));

        assert!(matches!(result, Err(KeyError::UnlockFailed)));
    }

    #[test]
    fn test_public_key_b64_roundtrip() {
        let keypair = UserKeyPair::generate();
        let parsed = public_key_from_b64(&keypair.public_key_b64()).unwrap();
        assert_eq!(parsed.as_bytes(), keypair.public_key().as_bytes());
    }

    #[test]
    fn test_fingerprint_stable() {
        let keypair = UserKeyPair::generate();
        assert_eq!(keypair.fingerprint(), keypair.fingerprint());
        assert_eq!(keypair.fingerprint().len(), 16);
    }
}
