/// Application name
pub const APP_NAME: &str = "DrLab";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// x25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Maximum plaintext message size in bytes (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Key derivation context (BLAKE3) for wrapping conversation keys
pub const KDF_CONTEXT_KEY_WRAP: &str = "drlab-key-wrap-v1";

/// Default page size for REST message history
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Bound on a single websocket frame write, in seconds
pub const WRITE_TIMEOUT_SECS: u64 = 10;

/// Delay before attempting to reconnect a dropped websocket, in seconds
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Window for matching a server echo against a pending optimistic message
/// when the server did not echo the client token, in seconds
pub const RECONCILE_WINDOW_SECS: i64 = 90;

/// Path of the realtime messaging endpoint on the server
pub const WS_MESSAGING_PATH: &str = "/ws/messaging/";
