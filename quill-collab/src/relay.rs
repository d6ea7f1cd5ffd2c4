//! Change and cursor relays.
//!
//! Both forward a room-scoped event to every member of the addressed room
//! except the sender. Neither checks that the sender belongs to the room,
//! and neither buffers: each call yields at most one broadcast.
//!
//! Text changes carry the full buffer. Concurrent senders each overwrite;
//! there is no merge step, so peers may diverge when arrival order differs.

use crate::broadcast::Broadcast;
use crate::protocol::{CursorUpdate, Identity, ServerEvent};
use crate::registry::{ConnectionId, RoomRegistry};

/// `text-change` → `receive-change` to the other members of the room.
///
/// Returns `None` when nobody else is in the room.
pub fn relay_text_change(
    registry: &RoomRegistry,
    sender: ConnectionId,
    document_id: &str,
    new_text: String,
) -> Option<Broadcast> {
    let broadcast = Broadcast::to_others(
        registry.members_of(document_id),
        sender,
        ServerEvent::ReceiveChange(new_text),
    );
    (!broadcast.is_empty()).then_some(broadcast)
}

/// `cursor-change` → `receive-cursor-change` to the other members of the room.
pub fn relay_cursor_change(
    registry: &RoomRegistry,
    sender: ConnectionId,
    document_id: &str,
    position: i64,
    identity: Identity,
) -> Option<Broadcast> {
    let broadcast = Broadcast::to_others(
        registry.members_of(document_id),
        sender,
        ServerEvent::ReceiveCursorChange(CursorUpdate { position, identity }),
    );
    (!broadcast.is_empty()).then_some(broadcast)
}
