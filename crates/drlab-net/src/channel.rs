//! Persistent realtime channel over a websocket.
//!
//! The driver runs in a dedicated tokio task and talks to the rest of the
//! application through typed command and event channels. Inbound frames are
//! delivered in wire order; a malformed frame is logged and dropped without
//! touching the connection. An unexpected close emits exactly one
//! `Disconnected` status and schedules a delayed reconnect with the
//! last-known auth token. An explicit `disconnect()` never reconnects.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use drlab_shared::constants::{RECONNECT_DELAY_SECS, WRITE_TIMEOUT_SECS};
use drlab_shared::protocol::{ClientFrame, ServerFrame};
use drlab_shared::types::ConnectionState;

use crate::error::{NetError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ChannelCommand {
    Send {
        frame: ClientFrame,
        done: oneshot::Sender<Result<()>>,
    },
    Disconnect,
}

/// Events delivered to the session event loop.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connection state transition (one event per transition).
    Status(ConnectionState),
    /// A frame arrived on the wire.
    Frame(ServerFrame),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Full websocket url, e.g. `ws://host:8000/ws/messaging/`.
    pub url: String,
    /// Bound on a single frame write.
    pub write_timeout: Duration,
    /// Delay before a reconnect attempt after an unexpected close.
    pub reconnect_delay: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

fn decode_state(raw: u8) -> ConnectionState {
    match raw {
        STATE_CONNECTED => ConnectionState::Connected,
        STATE_CONNECTING => ConnectionState::Connecting,
        _ => ConnectionState::Disconnected,
    }
}

/// Handle to the driver task. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeChannel {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    state: Arc<AtomicU8>,
}

impl RealtimeChannel {
    /// Open the websocket, authenticate via the bearer token, and spawn the
    /// driver task. Fails with [`NetError::Connection`] if the handshake is
    /// rejected; the caller decides whether to retry.
    pub async fn connect(
        config: ChannelConfig,
        auth_token: String,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>)> {
        let ws = open_socket(&config.url, &auth_token).await?;
        info!(url = %config.url, "Realtime channel connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let state = Arc::new(AtomicU8::new(STATE_CONNECTED));

        let driver = Driver {
            config,
            auth_token,
            state: state.clone(),
            event_tx,
        };
        tokio::spawn(driver.run(ws, cmd_rx));

        Ok((Self { cmd_tx, state }, event_rx))
    }

    pub fn state(&self) -> ConnectionState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    /// Serialize and write a frame. Fails fast with
    /// [`NetError::NotConnected`] outside the `Connected` state; the write
    /// itself is bounded by the configured timeout.
    pub async fn send(&self, frame: ClientFrame) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(NetError::NotConnected);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(ChannelCommand::Send {
                frame,
                done: done_tx,
            })
            .await
            .map_err(|_| NetError::ChannelClosed)?;
        done_rx.await.map_err(|_| NetError::ChannelClosed)?
    }

    /// Gracefully close the connection and stop the driver. Idempotent; no
    /// reconnect is scheduled afterwards.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ChannelCommand::Disconnect).await;
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

enum Close {
    /// Caller asked for it via `disconnect()`.
    Requested,
    /// All handles dropped; nobody is left to talk to.
    Gone,
    /// The socket died underneath us.
    Lost,
}

struct Driver {
    config: ChannelConfig,
    auth_token: String,
    state: Arc<AtomicU8>,
    event_tx: mpsc::Sender<ChannelEvent>,
}

impl Driver {
    async fn run(self, mut ws: WsStream, mut cmd_rx: mpsc::Receiver<ChannelCommand>) {
        self.emit_status(ConnectionState::Connected).await;
        self.send_hello(&mut ws).await;

        loop {
            match self.drive_socket(&mut ws, &mut cmd_rx).await {
                Close::Requested | Close::Gone => {
                    let _ = ws.close(None).await;
                    self.set_state(ConnectionState::Disconnected);
                    self.emit_status(ConnectionState::Disconnected).await;
                    debug!("Realtime channel stopped");
                    return;
                }
                Close::Lost => {
                    self.set_state(ConnectionState::Disconnected);
                    self.emit_status(ConnectionState::Disconnected).await;
                    warn!("Connection lost; scheduling reconnect");

                    match self.reconnect(&mut cmd_rx).await {
                        Some(new_ws) => {
                            ws = new_ws;
                            self.set_state(ConnectionState::Connected);
                            self.emit_status(ConnectionState::Connected).await;
                            self.send_hello(&mut ws).await;
                            info!("Realtime channel reconnected");
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Pump commands and the socket until something ends the connected phase.
    async fn drive_socket(
        &self,
        ws: &mut WsStream,
        cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
    ) -> Close {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send { frame, done }) => {
                        let result = self.write_frame(ws, &frame).await;
                        let fatal = matches!(result, Err(NetError::Connection(_)));
                        let _ = done.send(result);
                        if fatal {
                            return Close::Lost;
                        }
                    }
                    Some(ChannelCommand::Disconnect) => return Close::Requested,
                    None => return Close::Gone,
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text).await,
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => return Close::Lost,
                    Some(Err(e)) => {
                        warn!(error = %e, "Websocket read failed");
                        return Close::Lost;
                    }
                },
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        match ServerFrame::from_text(text) {
            Ok(ServerFrame::Unknown) => {
                debug!("Dropping frame with unrecognized type");
            }
            Ok(frame) => {
                // Wire order is preserved: one receive loop, one event queue.
                let _ = self.event_tx.send(ChannelEvent::Frame(frame)).await;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
            }
        }
    }

    async fn write_frame(&self, ws: &mut WsStream, frame: &ClientFrame) -> Result<()> {
        let text = frame
            .to_text()
            .map_err(|e| NetError::Protocol(e.to_string()))?;
        match tokio::time::timeout(self.config.write_timeout, ws.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetError::Connection(e.to_string())),
            Err(_) => Err(NetError::Timeout),
        }
    }

    async fn send_hello(&self, ws: &mut WsStream) {
        if let Err(e) = self.write_frame(ws, &ClientFrame::ConnectionEstablished {}).await {
            debug!(error = %e, "Post-handshake hello failed");
        }
    }

    /// Wait out the delay, then retry the handshake until it succeeds or a
    /// `Disconnect` arrives. Pending sends are refused while down.
    async fn reconnect(&self, cmd_rx: &mut mpsc::Receiver<ChannelCommand>) -> Option<WsStream> {
        loop {
            let sleep = tokio::time::sleep(self.config.reconnect_delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ChannelCommand::Send { done, .. }) => {
                            let _ = done.send(Err(NetError::NotConnected));
                        }
                        Some(ChannelCommand::Disconnect) | None => return None,
                    },
                }
            }

            self.set_state(ConnectionState::Connecting);
            match open_socket(&self.config.url, &self.auth_token).await {
                Ok(ws) => return Some(ws),
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(error = %e, "Reconnect attempt failed");
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => STATE_DISCONNECTED,
            ConnectionState::Connecting => STATE_CONNECTING,
            ConnectionState::Connected => STATE_CONNECTED,
        };
        self.state.store(raw, Ordering::Release);
    }

    async fn emit_status(&self, state: ConnectionState) {
        let _ = self.event_tx.send(ChannelEvent::Status(state)).await;
    }
}

async fn open_socket(url: &str, auth_token: &str) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| NetError::Connection(e.to_string()))?;
    let value = HeaderValue::from_str(&format!("Bearer {auth_token}"))
        .map_err(|_| NetError::Connection("auth token is not a valid header value".into()))?;
    request.headers_mut().insert(AUTHORIZATION, value);

    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| NetError::Connection(e.to_string()))?;
    Ok(ws)
}
