//! The collaboration hub: registry, presence and relays behind one owner.
//!
//! `CollabHub` is the only mutable state shared between connections. The
//! gateway wraps it in a single mutex and every lifecycle event or message
//! runs to completion under that lock, so membership changes and the
//! broadcasts derived from them are never interleaved.
//!
//! Nothing in here awaits. Outbound frames go into bounded per-connection
//! sinks with `try_send`; the connection tasks do the actual network writes.
//!
//! Per-connection lifecycle:
//! ```text
//! connected ──▶ Unjoined ──join──▶ Joined(doc) ──disconnect──▶ Closed
//!                   │                                             ▲
//!                   └────────────────disconnect───────────────────┘
//! ```

use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::broadcast::{Broadcast, BroadcastStats, Fanout, PeerSink};
use crate::identity::{IdentityVerifier, TrustCallerIdentity};
use crate::presence::PresenceTracker;
use crate::protocol::{ClientEvent, Identity, JoinPayload};
use crate::registry::{ConnectionId, DocumentId, JoinRefused, RoomRegistry, Roster, RosterPolicy};
use crate::relay::{relay_cursor_change, relay_text_change};

/// Hub behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Joins into a room with this many members are refused.
    pub max_peers_per_room: usize,
    pub roster_policy: RosterPolicy,
    /// Emit `clear-cursor` to the room when an identity leaves.
    pub clear_cursor_on_leave: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_peers_per_room: 100,
            roster_policy: RosterPolicy::Unconditional,
            clear_cursor_on_leave: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unjoined,
    Joined,
    Closed,
}

/// Hub-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub active_rooms: usize,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub malformed_events: u64,
    pub refused_joins: u64,
}

pub struct CollabHub {
    registry: RoomRegistry,
    presence: PresenceTracker,
    fanout: Fanout,
    verifier: Arc<dyn IdentityVerifier>,
    total_connections: u64,
    messages_received: u64,
    malformed_events: u64,
    refused_joins: u64,
}

impl CollabHub {
    pub fn new(config: HubConfig) -> Self {
        Self::with_verifier(config, Arc::new(TrustCallerIdentity))
    }

    pub fn with_verifier(config: HubConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            registry: RoomRegistry::with_policy(config.roster_policy)
                .with_max_members(config.max_peers_per_room),
            presence: PresenceTracker::new(config.clear_cursor_on_leave),
            fanout: Fanout::new(),
            verifier,
            total_connections: 0,
            messages_received: 0,
            malformed_events: 0,
            refused_joins: 0,
        }
    }

    /// A transport connection opened; `sink` receives its outbound frames.
    pub fn connected(&mut self, handle: ConnectionId, sink: PeerSink) {
        self.fanout.register(handle, sink);
        self.total_connections += 1;
        info!("[CONNECTED] Connection {handle} opened");
    }

    /// A transport connection closed. Leaves its room, if it joined one.
    pub fn disconnected(&mut self, handle: ConnectionId) {
        self.fanout.unregister(handle);
        info!("[DISCONNECTED] Connection {handle} closed");
        self.leave(handle);
    }

    /// A text frame arrived on `handle`.
    pub fn message(&mut self, handle: ConnectionId, frame: &str) {
        self.messages_received += 1;
        match ClientEvent::decode(frame) {
            Ok(event) => self.dispatch(handle, event),
            Err(e) => self.malformed(handle, &e.to_string()),
        }
    }

    /// Record an event that could not be processed. Never reaches the client.
    pub fn malformed(&mut self, handle: ConnectionId, reason: &str) {
        self.malformed_events += 1;
        warn!("[MALFORMED] Ignoring event from {handle}: {reason}");
    }

    pub fn dispatch(&mut self, handle: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::JoinDocument(JoinPayload::Document(join)) => {
                self.join_document(handle, &join.document_id, join.identity);
            }
            ClientEvent::JoinDocument(JoinPayload::Legacy(document_id)) => {
                let identity = Identity::anonymous(format!("anon-{handle}"));
                self.join_document(handle, &document_id, identity);
            }
            ClientEvent::TextChange(change) => {
                self.text_change(handle, &change.document_id, change.new_text);
            }
            ClientEvent::CursorChange(cursor) => {
                self.cursor_change(handle, &cursor.document_id, cursor.position, cursor.identity);
            }
        }
    }

    /// Admit `handle` into the room for `document_id` and push the roster to
    /// every member. Returns the roster, or `None` if the join was refused.
    pub fn join_document(
        &mut self,
        handle: ConnectionId,
        document_id: &str,
        claimed: Identity,
    ) -> Option<Roster> {
        if document_id.is_empty() {
            self.malformed(handle, "join-document without documentId");
            return None;
        }

        let identity = match self.verifier.verify(handle, claimed) {
            Ok(identity) => identity,
            Err(e) => {
                self.refused_joins += 1;
                warn!("[JOIN] Refused join from {handle} to room {document_id}: {e}");
                return None;
            }
        };

        let is_new_room = self.registry.members_of(document_id).is_empty();
        let identity_id = identity.id.clone();
        match self.registry.join(handle, document_id, identity) {
            Ok(roster) => {
                if is_new_room {
                    info!("Room {document_id} created");
                }
                info!(
                    "[JOIN] Connection {handle} ({identity_id}) joined room {document_id}, {} present",
                    roster.len()
                );
                let push = self.presence.on_join(&self.registry, document_id, roster.clone());
                self.deliver(&push);
                Some(roster)
            }
            Err(JoinRefused::EmptyDocumentId) => {
                self.malformed(handle, "join-document without documentId");
                None
            }
            Err(e) => {
                self.refused_joins += 1;
                warn!("[JOIN] Refused join from {handle} to room {document_id}: {e}");
                None
            }
        }
    }

    pub fn text_change(&mut self, handle: ConnectionId, document_id: &str, new_text: String) {
        if document_id.is_empty() {
            self.malformed(handle, "text-change without documentId");
            return;
        }
        debug!(
            "[TEXT-CHANGE] Connection {handle} in room {document_id} changed text ({} bytes)",
            new_text.len()
        );
        if let Some(broadcast) = relay_text_change(&self.registry, handle, document_id, new_text) {
            self.deliver(&broadcast);
        }
    }

    pub fn cursor_change(
        &mut self,
        handle: ConnectionId,
        document_id: &str,
        position: i64,
        identity: Identity,
    ) {
        if document_id.is_empty() {
            self.malformed(handle, "cursor-change without documentId");
            return;
        }
        trace!(
            "[CURSOR-CHANGE] {} at {position} in room {document_id}",
            identity.id
        );
        if let Some(broadcast) =
            relay_cursor_change(&self.registry, handle, document_id, position, identity)
        {
            self.deliver(&broadcast);
        }
    }

    fn leave(&mut self, handle: ConnectionId) {
        let (Some(document_id), Some(departed)) = (
            self.registry.room_of(handle).map(str::to_owned),
            self.registry.identity_of(handle).cloned(),
        ) else {
            return;
        };

        let roster = self.registry.leave(handle);
        info!(
            "[LEAVE] Connection {handle} ({}) left room {document_id}",
            departed.id
        );
        if roster.is_none() {
            info!("Room {document_id} removed (empty)");
        }

        for push in self.presence.on_leave(&self.registry, &document_id, &departed, roster) {
            self.deliver(&push);
        }
    }

    fn deliver(&mut self, broadcast: &Broadcast) {
        if let Err(e) = self.fanout.deliver(broadcast) {
            error!("Failed to encode {}: {e}", broadcast.event.name());
        }
    }

    pub fn connection_state(&self, handle: ConnectionId) -> ConnectionState {
        if self.registry.room_of(handle).is_some() {
            ConnectionState::Joined
        } else if self.fanout.contains(handle) {
            ConnectionState::Unjoined
        } else {
            ConnectionState::Closed
        }
    }

    /// Document the connection joined, if any.
    pub fn room_of(&self, handle: ConnectionId) -> Option<DocumentId> {
        self.registry.room_of(handle).map(str::to_owned)
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn stats(&self) -> HubStats {
        let BroadcastStats {
            messages_sent,
            messages_dropped,
            active_peers,
        } = self.fanout.stats();
        HubStats {
            total_connections: self.total_connections,
            active_connections: active_peers,
            active_rooms: self.registry.room_count(),
            messages_received: self.messages_received,
            messages_sent,
            messages_dropped,
            malformed_events: self.malformed_events,
            refused_joins: self.refused_joins,
        }
    }
}
