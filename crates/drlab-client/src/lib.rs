//! Client orchestration: key management, message crypto, and the messaging
//! session that ties the REST api, the realtime channel, and the
//! conversation store together for an embedding UI.

pub mod config;
pub mod crypto;
pub mod events;
pub mod keystore;
pub mod session;

mod error;

pub use config::ClientConfig;
pub use crypto::{ConversationCrypto, DECRYPT_PLACEHOLDER};
pub use error::{ClientError, Result};
pub use events::SessionEvent;
pub use keystore::{CryptoKeyStore, KeyDirectory};
pub use session::{MessagingApi, MessagingSession, SessionHandle};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default log subscriber. Embedders call this once at startup;
/// `RUST_LOG` overrides the built-in filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("drlab_client=debug,drlab_net=debug,drlab_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
