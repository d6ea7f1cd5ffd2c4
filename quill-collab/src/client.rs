//! WebSocket client for the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - `join-document`, `text-change` and `cursor-change` sends
//! - Decoded server events on an mpsc channel
//! - Caller-side cursor debouncing ([`CursorThrottle`])

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEvent, Identity, ProtocolError, ServerEvent};

/// Minimum spacing of cursor reports sent by a client.
pub const DEFAULT_CURSOR_INTERVAL: Duration = Duration::from_millis(50);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Decoded event pushed by the server
    Server(ServerEvent),
}

/// Drops cursor reports that follow the previous one too closely.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Returns `true` (and starts a new interval) if a report may go out now.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    fn admit_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_sent = Some(now);
        true
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_CURSOR_INTERVAL)
    }
}

pub struct CollabClient {
    server_url: String,

    state: Arc<RwLock<ConnectionState>>,

    cursor_throttle: Mutex<CursorThrottle>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<PeerEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<PeerEvent>,
}

impl CollabClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            cursor_throttle: Mutex::new(CursorThrottle::default()),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    pub fn with_cursor_interval(mut self, interval: Duration) -> Self {
        self.cursor_throttle = Mutex::new(CursorThrottle::new(interval));
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket, close when it ends
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(Message::text(frame)).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(PeerEvent::Connected).await;

        // Reader task: decode server events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            let _ = event_tx.send(PeerEvent::Server(event)).await;
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(PeerEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. The server treats this as a disconnect.
    pub async fn disconnect(&mut self) {
        // Dropping the sender ends the writer task, which sends a Close frame
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn join_document(
        &self,
        document_id: impl Into<String>,
        identity: Identity,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::join(document_id, identity)).await
    }

    pub async fn send_text_change(
        &self,
        document_id: impl Into<String>,
        new_text: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::text_change(document_id, new_text)).await
    }

    /// Send a cursor report unless the throttle suppresses it.
    ///
    /// Returns whether the report was sent.
    pub async fn send_cursor_change(
        &self,
        document_id: impl Into<String>,
        position: i64,
        identity: Identity,
    ) -> Result<bool, ProtocolError> {
        if !self.cursor_throttle.lock().await.admit() {
            return Ok(false);
        }
        self.send(&ClientEvent::cursor_change(document_id, position, identity))
            .await?;
        Ok(true)
    }

    pub async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        self.send_raw(event.encode()?).await
    }

    /// Send an arbitrary text frame, valid or not.
    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::NotConnected)?;
        tx.send(frame.into())
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CollabClient::new("ws://localhost:3001");
        assert_eq!(client.server_url(), "ws://localhost:3001");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = CollabClient::new("ws://localhost:3001");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let client = CollabClient::new("ws://localhost:3001");
        let err = client.send_text_change("doc1", "x").await.unwrap_err();
        assert_eq!(err, ProtocolError::NotConnected);
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        // Port 9 (discard) is essentially never a WebSocket server
        let mut client = CollabClient::new("ws://127.0.0.1:9");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = CollabClient::new("ws://localhost:3001");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[test]
    fn test_cursor_throttle() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let start = Instant::now();

        assert!(throttle.admit_at(start));
        assert!(!throttle.admit_at(start + Duration::from_millis(10)));
        assert!(!throttle.admit_at(start + Duration::from_millis(49)));
        assert!(throttle.admit_at(start + Duration::from_millis(50)));
        assert!(!throttle.admit_at(start + Duration::from_millis(60)));
    }

    #[test]
    fn test_cursor_throttle_zero_interval() {
        let mut throttle = CursorThrottle::new(Duration::ZERO);
        assert!(throttle.admit());
        assert!(throttle.admit());
    }
}
