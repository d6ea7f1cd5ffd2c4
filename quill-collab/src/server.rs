//! WebSocket gateway in front of the collaboration hub.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── PeerSink A ──▶ Client A
//!             ├── connection tasks ──▶ CollabHub (one mutex)
//! Client B ──┘   (one per socket)     └── PeerSink B ──▶ Client B
//! ```
//!
//! Each connection task:
//! - performs the handshake (with an `Origin` allow-list)
//! - assigns a fresh [`ConnectionId`] and registers an outbound sink
//! - feeds every text frame to [`CollabHub::message`]
//! - writes frames queued in its sink back to the socket
//! - reports the disconnect when the socket ends, whatever the reason
//!
//! Reconnection, back-off and heartbeats are left to the WebSocket layer
//! and the clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{Frame, PeerSink};
use crate::hub::{CollabHub, HubConfig, HubStats};
use crate::identity::IdentityVerifier;
use crate::registry::{ConnectionId, RosterPolicy};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Accepted `Origin` header values; `*` accepts any.
    /// Handshakes without an `Origin` header are always accepted.
    pub allowed_origins: Vec<String>,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Outbound frames buffered per connection before dropping
    pub outbound_capacity: usize,
    /// Time a client gets to finish the WebSocket handshake
    pub handshake_timeout: Duration,
    pub roster_policy: RosterPolicy,
    pub clear_cursor_on_leave: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_peers_per_room: 100,
            outbound_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
            roster_policy: RosterPolicy::Unconditional,
            clear_cursor_on_leave: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ServerConfig {
    pub const ENV_BIND_ADDR: &'static str = "QUILL_BIND_ADDR";
    pub const ENV_ALLOWED_ORIGINS: &'static str = "QUILL_ALLOWED_ORIGINS";
    pub const ENV_MAX_PEERS_PER_ROOM: &'static str = "QUILL_MAX_PEERS_PER_ROOM";
    pub const ENV_OUTBOUND_CAPACITY: &'static str = "QUILL_OUTBOUND_CAPACITY";
    pub const ENV_HANDSHAKE_TIMEOUT_MS: &'static str = "QUILL_HANDSHAKE_TIMEOUT_MS";
    pub const ENV_ROSTER_POLICY: &'static str = "QUILL_ROSTER_POLICY";
    pub const ENV_CLEAR_CURSOR_ON_LEAVE: &'static str = "QUILL_CLEAR_CURSOR_ON_LEAVE";

    /// Defaults overlaid with `QUILL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns per variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup(Self::ENV_BIND_ADDR) {
            config.bind_addr = addr;
        }
        if let Some(origins) = lookup(Self::ENV_ALLOWED_ORIGINS) {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup(Self::ENV_MAX_PEERS_PER_ROOM) {
            config.max_peers_per_room = parse_positive(Self::ENV_MAX_PEERS_PER_ROOM, value)?;
        }
        if let Some(value) = lookup(Self::ENV_OUTBOUND_CAPACITY) {
            config.outbound_capacity = parse_positive(Self::ENV_OUTBOUND_CAPACITY, value)?;
        }
        if let Some(value) = lookup(Self::ENV_HANDSHAKE_TIMEOUT_MS) {
            let millis = parse_positive(Self::ENV_HANDSHAKE_TIMEOUT_MS, value)?;
            config.handshake_timeout = Duration::from_millis(millis as u64);
        }
        if let Some(value) = lookup(Self::ENV_ROSTER_POLICY) {
            config.roster_policy = value.parse().map_err(|reason| ConfigError::Invalid {
                key: Self::ENV_ROSTER_POLICY,
                value: value.clone(),
                reason,
            })?;
        }
        if let Some(value) = lookup(Self::ENV_CLEAR_CURSOR_ON_LEAVE) {
            config.clear_cursor_on_leave = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: Self::ENV_CLEAR_CURSOR_ON_LEAVE,
                        value,
                        reason: "expected a boolean".to_string(),
                    })
                }
            };
        }

        Ok(config)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_peers_per_room: self.max_peers_per_room,
            roster_policy: self.roster_policy,
            clear_cursor_on_leave: self.clear_cursor_on_leave,
        }
    }

    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
        }
    }
}

/// Pause applied after a failed `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// `None` when the error concerns only the connection being accepted, so
/// the next accept can follow at once. Anything else (EMFILE, ENFILE,
/// ENOBUFS) is a resource shortage that clears as connections close.
fn accept_retry_delay(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

fn parse_positive(key: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),
    #[error("Handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    hub: Arc<Mutex<CollabHub>>,
}

impl CollabServer {
    pub fn new(config: ServerConfig) -> Self {
        let hub = CollabHub::new(config.hub_config());
        Self {
            config,
            hub: Arc::new(Mutex::new(hub)),
        }
    }

    /// Create with a custom identity verifier for `join-document`.
    pub fn with_verifier(config: ServerConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let hub = CollabHub::with_verifier(config.hub_config(), verifier);
        Self {
            config,
            hub: Arc::new(Mutex::new(hub)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the process stops.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    ///
    /// Accept errors never end the loop: they belong to one pending
    /// connection or to a passing shortage such as descriptor exhaustion.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Collaboration server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    match accept_retry_delay(&e) {
                        None => debug!("Accept aborted by peer: {e}"),
                        Some(delay) => {
                            warn!("Accept failed, retrying in {delay:?}: {e}");
                            tokio::time::sleep(delay).await;
                        }
                    }
                    continue;
                }
            };
            debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                match Self::handle_connection(stream, addr, hub, config).await {
                    Ok(()) => {}
                    Err(e @ (ServerError::Handshake(_) | ServerError::HandshakeTimeout(_))) => {
                        warn!("Rejected connection from {addr}: {e}");
                    }
                    Err(e) => {
                        log::error!("Connection error from {addr}: {e}");
                    }
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Mutex<CollabHub>>,
        config: ServerConfig,
    ) -> Result<(), ServerError> {
        let origin_check = config.clone();
        let handshake = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let origin = request
                    .headers()
                    .get("origin")
                    .and_then(|value| value.to_str().ok());
                if origin_check.origin_allowed(origin) {
                    return Ok(response);
                }
                warn!("Refusing handshake from origin {origin:?}");
                let mut rejection = ErrorResponse::new(Some("origin not allowed".to_string()));
                *rejection.status_mut() = StatusCode::FORBIDDEN;
                Err(rejection)
            },
        );
        let ws_stream = tokio::time::timeout(config.handshake_timeout, handshake)
            .await
            .map_err(|_| ServerError::HandshakeTimeout(config.handshake_timeout))?
            .map_err(ServerError::Handshake)?;

        let handle = ConnectionId::new();
        let (sink, outbound) = PeerSink::channel(config.outbound_capacity);
        hub.lock().await.connected(handle, sink);
        info!("WebSocket connection {handle} established from {addr}");

        let result = Self::pump(ws_stream, handle, addr, &hub, outbound).await;

        // Disconnect is reported exactly once, however the socket ended
        hub.lock().await.disconnected(handle);
        result
    }

    /// Shuttle frames between the socket and the hub until either side ends.
    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        handle: ConnectionId,
        addr: SocketAddr,
        hub: &Mutex<CollabHub>,
        mut outbound: mpsc::Receiver<Frame>,
    ) -> Result<(), ServerError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            hub.lock().await.message(handle, text.as_str());
                        }
                        Some(Ok(Message::Binary(_))) => {
                            hub.lock().await.malformed(handle, "binary frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Connection {handle} closed from {addr}");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket error from {addr}: {e}");
                            break;
                        }
                    }
                }

                // Outgoing frame queued by the hub
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => ws_sender.send(Message::Text(frame)).await?,
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn stats(&self) -> HubStats {
        self.hub.lock().await.stats()
    }

    pub fn hub(&self) -> &Arc<Mutex<CollabHub>> {
        &self.hub
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
