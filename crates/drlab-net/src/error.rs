use thiserror::Error;

/// Errors produced by the network layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport failed to establish or maintain a connection. Non-fatal;
    /// the channel schedules a retry, REST callers decide for themselves.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server rejected our credentials or token. Fatal to the session.
    #[error("Authentication rejected")]
    Auth,

    /// A frame was submitted while the channel was not connected.
    #[error("Not connected to the messaging server")]
    NotConnected,

    /// Non-success REST response that is not an auth failure.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP transport error (DNS, TLS, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// We produced or received a frame that does not serialize.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A websocket write exceeded the configured bound.
    #[error("Write timed out")]
    Timeout,

    /// The channel driver task is gone.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
