//! Duplex transport to the remote speech agent
//!
//! One WebSocket per session: JSON control frames plus binary PCM in both
//! directions. The manager owns connect/auth/keep-alive/reconnect; the
//! reconnect gate is consulted before every attempt so a manual
//! disconnect is terminal even when close events race it.

mod reconnect;

pub use reconnect::{ReconnectGate, ReconnectPolicy};

use std::sync::{Arc, Mutex};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::auth::TokenClient;
use crate::config::ConnectionConfig;
use crate::protocol::ClientFrame;
use crate::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Error,
    Closed,
}

/// Events the transport surfaces to the orchestration loop
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection state changed
    State(ConnectionState),
    /// The reconnect ceiling was exhausted
    RateLimited,
    /// A JSON control frame arrived
    Frame(String),
    /// A binary audio frame arrived
    Audio(Vec<u8>),
}

/// Connection manager for the agent socket
///
/// Cheap to clone; every clone shares the same connection and gate.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    session_config: ClientFrame,
    token: TokenClient,
    gate: ReconnectGate,
    state: Mutex<ConnectionState>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ConnectionManager {
    /// Create a manager that surfaces events on `events`
    ///
    /// `session_config` is sent as the first frame after every open,
    /// including reconnects.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        session_config: ClientFrame,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let token = TokenClient::new(config.token_url.clone(), config.api_key.clone());
        let gate = ReconnectGate::new(ReconnectPolicy {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        });
        Self {
            inner: Arc::new(Inner {
                config,
                session_config,
                token,
                gate,
                state: Mutex::new(ConnectionState::NotConnected),
                sink: tokio::sync::Mutex::new(None),
                keepalive: Mutex::new(None),
                events,
            }),
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map_or(ConnectionState::Error, |s| *s)
    }

    /// Whether the reconnect ceiling was exhausted
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.inner.gate.is_rate_limited()
    }

    /// Open the connection
    ///
    /// A no-op while already connecting/connected or after a manual
    /// disconnect. Failures schedule a bounded reconnect; they are not
    /// returned to the caller.
    pub async fn connect(&self) {
        if !self.inner.gate.may_connect() {
            tracing::debug!("connect ignored after manual disconnect");
            return;
        }
        {
            let mut state = match self.inner.state.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                tracing::debug!(state = ?*state, "connect ignored, connection in flight");
                return;
            }
            *state = ConnectionState::Connecting;
        }
        self.emit(TransportEvent::State(ConnectionState::Connecting));
        tracing::info!(url = %self.inner.config.agent_url, "connecting to agent");

        match self.open_socket().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.inner.gate.on_open();
                tracing::info!("agent connection open");

                if let Err(e) = self.send_frame(&self.inner.session_config).await {
                    tracing::warn!(error = %e, "failed to send session config");
                }
                self.start_keepalive();
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                self.set_state(ConnectionState::Error);
                self.schedule_reconnect();
            }
        }
    }

    /// Manually close the connection; terminal for this session
    ///
    /// The gate flag is set before the socket closes so the resulting
    /// close event cannot schedule a reconnect. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.gate.manual_disconnect();
        self.stop_keepalive();

        let mut sink = self.inner.sink.lock().await;
        if let Some(mut ws) = sink.take() {
            if let Err(e) = ws.send(Message::Close(None)).await {
                tracing::debug!(error = %e, "close frame send failed");
            }
        }
        drop(sink);

        if self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed);
            tracing::info!("agent connection closed by caller");
        }
    }

    /// Clear the manual-disconnect flag and attempt counter
    ///
    /// Permits a fresh session after a manual disconnect or rate limit.
    pub fn reset(&self) {
        self.inner.gate.reset();
        self.set_state(ConnectionState::NotConnected);
    }

    /// Send a control frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when no connection is open.
    pub async fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.send_message(Message::Text(text)).await
    }

    /// Send a binary audio frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when no connection is open.
    pub async fn send_audio(&self, bytes: Vec<u8>) -> Result<()> {
        self.send_message(Message::Binary(bytes)).await
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        let Some(ws) = sink.as_mut() else {
            return Err(Error::Transport("connection not open".to_string()));
        };
        ws.send(message).await?;
        Ok(())
    }

    /// Fetch a token, dial the socket, and spawn the reader
    async fn open_socket(&self) -> Result<()> {
        let token = self.inner.token.fetch().await?;

        let mut request = self
            .inner
            .config
            .agent_url
            .as_str()
            .into_client_request()?;
        let header = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Auth(format!("token not header-safe: {e}")))?;
        request.headers_mut().insert("Authorization", header);

        let (ws, _) = connect_async(request).await?;
        let (sink, stream) = ws.split();

        *self.inner.sink.lock().await = Some(sink);

        let manager = self.clone();
        tokio::spawn(async move {
            manager.read_loop(stream).await;
        });

        Ok(())
    }

    /// Pump inbound messages until the socket closes
    async fn read_loop(
        &self,
        mut stream: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    ) {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    self.emit(TransportEvent::Frame(text));
                }
                Ok(Message::Binary(bytes)) => {
                    self.emit(TransportEvent::Audio(bytes));
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("agent closed the connection");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "socket read error");
                    break;
                }
            }
        }
        self.handle_close().await;
    }

    /// Shared close path for remote closes and read errors
    async fn handle_close(&self) {
        self.stop_keepalive();
        self.inner.sink.lock().await.take();
        self.set_state(ConnectionState::Closed);
        self.schedule_reconnect();
    }

    /// Consult the gate and schedule a delayed reconnect if permitted
    fn schedule_reconnect(&self) {
        match self.inner.gate.on_close() {
            Some(delay) => {
                let attempt = self.inner.gate.attempts();
                tracing::info!(attempt, delay_secs = delay.as_secs(), "reconnect scheduled");
                let manager = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Re-check: a manual disconnect may have landed meanwhile
                    if manager.inner.gate.may_connect() {
                        manager.connect().await;
                    }
                });
            }
            None => {
                if self.inner.gate.is_rate_limited() {
                    tracing::warn!("reconnect attempts exhausted");
                    self.emit(TransportEvent::RateLimited);
                }
            }
        }
    }

    /// Hold the connection open with periodic no-op frames
    ///
    /// Keep-alives run regardless of conversation state; a sleeping
    /// session keeps its socket.
    fn start_keepalive(&self) {
        let manager = self.clone();
        let interval = self.inner.config.keepalive_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );
            loop {
                ticker.tick().await;
                if manager.send_frame(&ClientFrame::Keepalive).await.is_err() {
                    break;
                }
                tracing::trace!("keepalive sent");
            }
        });

        if let Ok(mut slot) = self.inner.keepalive.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    fn stop_keepalive(&self) {
        if let Ok(mut slot) = self.inner.keepalive.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut state) = self.inner.state.lock() {
            if *state == next {
                return;
            }
            *state = next;
        }
        self.emit(TransportEvent::State(next));
    }

    fn emit(&self, event: TransportEvent) {
        if self.inner.events.send(event).is_err() {
            tracing::debug!("event channel closed");
        }
    }
}
