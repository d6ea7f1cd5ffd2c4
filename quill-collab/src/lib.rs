//! # quill-collab: Real-time presence and broadcast core
//!
//! Turns independent WebSocket connections into rooms keyed by document id,
//! tracks who is present in each room, and relays text changes and cursor
//! positions between room members.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    WebSocket     ┌──────────────────────────────┐
//! │ CollabClient │ ◄──────────────► │ CollabServer (gateway)       │
//! │ (per user)   │   JSON events    │   one task per connection    │
//! └──────────────┘                  └──────────────┬───────────────┘
//!                                                  │ lock, run, unlock
//!                                                  ▼
//!                                   ┌──────────────────────────────┐
//!                                   │ CollabHub                    │
//!                                   │  RoomRegistry   (rooms)      │
//!                                   │  PresenceTracker (rosters)   │
//!                                   │  relays  (change / cursor)   │
//!                                   │  Fanout  (per-peer sinks)    │
//!                                   └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Named JSON events on the wire
//! - [`registry`]: Rooms, members and rosters
//! - [`presence`]: Roster pushes on join/leave
//! - [`relay`]: Text and cursor forwarding, sender excluded
//! - [`broadcast`]: Bounded per-connection fan-out
//! - [`identity`]: Pluggable identity admission
//! - [`hub`]: Single-writer owner of all of the above
//! - [`server`]: WebSocket gateway
//! - [`client`]: WebSocket client
//!
//! The core does not merge concurrent edits, persist anything, or verify
//! identities on its own.

pub mod protocol;
pub mod registry;
pub mod presence;
pub mod relay;
pub mod broadcast;
pub mod identity;
pub mod hub;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{
    ClientEvent, CursorChange, CursorCleared, CursorUpdate, Identity, JoinDocument, JoinPayload,
    ProtocolError, ServerEvent, TextChange,
};
pub use registry::{ConnectionId, DocumentId, JoinRefused, RoomRegistry, Roster, RosterPolicy};
pub use presence::PresenceTracker;
pub use relay::{relay_cursor_change, relay_text_change};
pub use broadcast::{Broadcast, BroadcastStats, Delivery, Fanout, Frame, PeerSink};
pub use identity::{IdentityVerifier, TrustCallerIdentity, VerifyError};
pub use hub::{CollabHub, ConnectionState, HubConfig, HubStats};
pub use server::{CollabServer, ConfigError, ServerConfig, ServerError};
pub use client::{CollabClient, CursorThrottle, PeerEvent};
