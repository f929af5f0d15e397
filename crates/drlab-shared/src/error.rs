use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum KeyError {
    /// Wrong password, corrupt blob, or the decrypted material did not
    /// parse as a private key.
    #[error("Failed to unlock private key")]
    UnlockFailed,

    /// The user has no registered public key.
    #[error("No registered key for user {0}")]
    NoSuchKey(String),

    #[error("Key fetch failed: {0}")]
    FetchFailed(String),

    #[error("Key wrap failed")]
    WrapFailed,

    #[error("Key unwrap failed: wrong recipient or corrupt blob")]
    UnwrapFailed,
}
