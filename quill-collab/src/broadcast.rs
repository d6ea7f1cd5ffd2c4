//! Fan-out of server events to per-connection sinks.
//!
//! Each connection owns a bounded outbound channel. A broadcast encodes its
//! event once and pushes the shared frame into every target sink with
//! `try_send`, so a slow peer loses frames instead of stalling the room.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::protocol::{ProtocolError, ServerEvent};
use crate::registry::ConnectionId;

/// Pre-encoded text frame, shared between all targets of one broadcast.
///
/// Clones share one reference-counted buffer, and the gateway hands it to
/// the socket as a text message without copying.
pub type Frame = Utf8Bytes;

/// Outcome of pushing one frame into one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Sink buffer full; the frame is lost for this peer.
    Dropped,
    /// Peer is gone.
    Closed,
}

/// Sending half of a connection's outbound buffer.
#[derive(Debug, Clone)]
pub struct PeerSink {
    tx: mpsc::Sender<Frame>,
}

impl PeerSink {
    /// Create a sink and the receiver its connection task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn try_deliver(&self, frame: Frame) -> Delivery {
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// One event addressed to an explicit set of connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub targets: Vec<ConnectionId>,
    pub event: ServerEvent,
}

impl Broadcast {
    /// Every member of the room.
    pub fn to_all(members: &[ConnectionId], event: ServerEvent) -> Self {
        Self {
            targets: members.to_vec(),
            event,
        }
    }

    /// Every member of the room except `sender`.
    pub fn to_others(members: &[ConnectionId], sender: ConnectionId, event: ServerEvent) -> Self {
        Self {
            targets: members.iter().copied().filter(|m| *m != sender).collect(),
            event,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Registered sinks, keyed by connection.
#[derive(Debug, Default)]
pub struct Fanout {
    sinks: HashMap<ConnectionId, PeerSink>,
    messages_sent: u64,
    messages_dropped: u64,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: ConnectionId, sink: PeerSink) {
        self.sinks.insert(handle, sink);
    }

    pub fn unregister(&mut self, handle: ConnectionId) -> Option<PeerSink> {
        self.sinks.remove(&handle)
    }

    pub fn contains(&self, handle: ConnectionId) -> bool {
        self.sinks.contains_key(&handle)
    }

    /// Deliver a broadcast. Returns the number of sinks that accepted it.
    ///
    /// Targets without a registered sink are skipped silently.
    pub fn deliver(&mut self, broadcast: &Broadcast) -> Result<usize, ProtocolError> {
        if broadcast.is_empty() {
            return Ok(0);
        }
        let frame = Frame::from(broadcast.event.encode()?);

        let mut delivered = 0;
        for target in &broadcast.targets {
            let Some(sink) = self.sinks.get(target) else {
                continue;
            };
            match sink.try_deliver(frame.clone()) {
                Delivery::Sent => {
                    delivered += 1;
                    self.messages_sent += 1;
                }
                Delivery::Dropped => {
                    self.messages_dropped += 1;
                    log::warn!(
                        "Outbound buffer full for {target}, dropped {}",
                        broadcast.event.name()
                    );
                }
                Delivery::Closed => {
                    log::debug!("Peer {target} closed before {} was delivered", broadcast.event.name());
                }
            }
        }
        Ok(delivered)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            messages_dropped: self.messages_dropped,
            active_peers: self.sinks.len(),
        }
    }
}
