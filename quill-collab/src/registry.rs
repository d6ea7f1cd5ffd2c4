//! Room registry: document id → member connections + roster.
//!
//! A room is created implicitly by the first join for a document id and
//! removed as soon as its last member leaves. Each room keeps:
//! - its member connections, in join order, never duplicated
//! - its roster of distinct identities, deduplicated by identity id
//!
//! Roster order is stable: joins append, leaves remove in place.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::Identity;

/// Opaque key of a document, and therefore of its room.
pub type DocumentId = String;

/// Ordered, deduplicated presence view of a room.
pub type Roster = Vec<Identity>;

/// Process-unique handle of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happens to a roster entry when one of its connections leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RosterPolicy {
    /// Drop the identity as soon as any of its connections leaves, even if
    /// another connection with the same identity id is still in the room.
    #[default]
    Unconditional,
    /// Drop the identity only when its last connection in the room leaves.
    RefCounted,
}

impl std::str::FromStr for RosterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unconditional" => Ok(Self::Unconditional),
            "ref-counted" | "refcounted" => Ok(Self::RefCounted),
            other => Err(format!("unknown roster policy '{other}'")),
        }
    }
}

/// Why a join did not register the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinRefused {
    #[error("empty document id")]
    EmptyDocumentId,
    #[error("connection already joined document '{0}'")]
    AlreadyJoined(DocumentId),
    #[error("room '{document_id}' is full ({capacity} members)")]
    RoomFull {
        document_id: DocumentId,
        capacity: usize,
    },
}

#[derive(Debug, Clone)]
struct RosterEntry {
    identity: Identity,
    /// Member connections currently holding this identity.
    connections: usize,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<ConnectionId>,
    roster: Vec<RosterEntry>,
}

impl Room {
    fn roster(&self) -> Roster {
        self.roster.iter().map(|e| e.identity.clone()).collect()
    }

    fn entry_mut(&mut self, identity_id: &str) -> Option<&mut RosterEntry> {
        self.roster.iter_mut().find(|e| e.identity.id == identity_id)
    }

    fn remove_entry(&mut self, identity_id: &str) {
        if let Some(pos) = self.roster.iter().position(|e| e.identity.id == identity_id) {
            self.roster.remove(pos);
        }
    }
}

#[derive(Debug, Clone)]
struct Membership {
    document_id: DocumentId,
    identity: Identity,
}

/// Maps document ids to rooms and connections to their single room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<DocumentId, Room>,
    memberships: HashMap<ConnectionId, Membership>,
    policy: RosterPolicy,
    /// Maximum members per room (`None` = unlimited).
    max_members: Option<usize>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RosterPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn with_max_members(mut self, max_members: usize) -> Self {
        self.max_members = Some(max_members);
        self
    }

    pub fn policy(&self) -> RosterPolicy {
        self.policy
    }

    /// Register `handle` in the room for `document_id` and return the roster.
    ///
    /// The identity is appended to the roster unless an entry with the same
    /// id exists. Joining the same document again is idempotent. A connection
    /// joins at most one document for its lifetime.
    pub fn join(
        &mut self,
        handle: ConnectionId,
        document_id: &str,
        identity: Identity,
    ) -> Result<Roster, JoinRefused> {
        if document_id.is_empty() {
            return Err(JoinRefused::EmptyDocumentId);
        }

        if let Some(existing) = self.memberships.get(&handle) {
            if existing.document_id != document_id {
                return Err(JoinRefused::AlreadyJoined(existing.document_id.clone()));
            }
            return Ok(self.roster_of(document_id));
        }

        if let Some(capacity) = self.max_members {
            let occupied = self.rooms.get(document_id).map_or(0, |r| r.members.len());
            if occupied >= capacity {
                return Err(JoinRefused::RoomFull {
                    document_id: document_id.to_string(),
                    capacity,
                });
            }
        }

        let room = self.rooms.entry(document_id.to_string()).or_default();
        room.members.push(handle);
        match room.entry_mut(&identity.id) {
            Some(entry) => entry.connections += 1,
            None => room.roster.push(RosterEntry {
                identity: identity.clone(),
                connections: 1,
            }),
        }
        let roster = room.roster();

        self.memberships.insert(
            handle,
            Membership {
                document_id: document_id.to_string(),
                identity,
            },
        );
        Ok(roster)
    }

    /// Remove `handle` from its room.
    ///
    /// Returns the roster after removal, or `None` if the handle never joined
    /// or the room is now empty (and has been dropped).
    pub fn leave(&mut self, handle: ConnectionId) -> Option<Roster> {
        let membership = self.memberships.remove(&handle)?;
        let room = self.rooms.get_mut(&membership.document_id)?;

        room.members.retain(|m| *m != handle);

        let identity_id = membership.identity.id.as_str();
        match self.policy {
            RosterPolicy::Unconditional => room.remove_entry(identity_id),
            RosterPolicy::RefCounted => {
                let drained = match room.entry_mut(identity_id) {
                    Some(entry) => {
                        entry.connections = entry.connections.saturating_sub(1);
                        entry.connections == 0
                    }
                    None => false,
                };
                if drained {
                    room.remove_entry(identity_id);
                }
            }
        }

        if room.members.is_empty() {
            self.rooms.remove(&membership.document_id);
            return None;
        }
        Some(room.roster())
    }

    /// Document the handle joined, if any.
    pub fn room_of(&self, handle: ConnectionId) -> Option<&str> {
        self.memberships.get(&handle).map(|m| m.document_id.as_str())
    }

    /// Identity the handle joined with, if any.
    pub fn identity_of(&self, handle: ConnectionId) -> Option<&Identity> {
        self.memberships.get(&handle).map(|m| &m.identity)
    }

    /// Member connections of a room, in join order. Empty for unknown rooms.
    pub fn members_of(&self, document_id: &str) -> &[ConnectionId] {
        self.rooms
            .get(document_id)
            .map(|r| r.members.as_slice())
            .unwrap_or(&[])
    }

    /// Current roster of a room. Empty for unknown rooms.
    pub fn roster_of(&self, document_id: &str) -> Roster {
        self.rooms.get(document_id).map(Room::roster).unwrap_or_default()
    }

    pub fn contains_identity(&self, document_id: &str, identity_id: &str) -> bool {
        self.rooms
            .get(document_id)
            .is_some_and(|r| r.roster.iter().any(|e| e.identity.id == identity_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn joined_count(&self) -> usize {
        self.memberships.len()
    }

    pub fn active_documents(&self) -> Vec<DocumentId> {
        self.rooms.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(roster: &Roster) -> Vec<&str> {
        roster.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_join_creates_room() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();

        let roster = registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        assert_eq!(ids(&roster), vec!["u1"]);
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.joined_count(), 1);
        assert_eq!(registry.room_of(a), Some("doc1"));
        assert_eq!(registry.members_of("doc1"), &[a]);
    }

    #[test]
    fn test_roster_appends_in_join_order() {
        let mut registry = RoomRegistry::new();
        registry.join(ConnectionId::new(), "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(ConnectionId::new(), "doc1", Identity::new("u2", "Bob")).unwrap();
        let roster = registry.join(ConnectionId::new(), "doc1", Identity::new("u3", "Carol")).unwrap();
        assert_eq!(ids(&roster), vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn test_same_identity_is_not_duplicated() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        let roster = registry.join(b, "doc1", Identity::new("u1", "Alice (tab 2)")).unwrap();

        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Alice");
        // Connection is still registered for reconnect-with-same-identity
        assert_eq!(registry.members_of("doc1"), &[a, b]);
    }

    #[test]
    fn test_rejoin_same_document_is_idempotent() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();

        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        let roster = registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();

        assert_eq!(roster.len(), 1);
        assert_eq!(registry.members_of("doc1").len(), 1);
    }

    #[test]
    fn test_join_other_document_is_refused() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();

        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        let err = registry.join(a, "doc2", Identity::new("u1", "Alice")).unwrap_err();

        assert_eq!(err, JoinRefused::AlreadyJoined("doc1".into()));
        assert_eq!(registry.room_of(a), Some("doc1"));
        assert!(registry.members_of("doc2").is_empty());
    }

    #[test]
    fn test_empty_document_id_is_refused() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();

        let err = registry.join(a, "", Identity::new("u1", "Alice")).unwrap_err();
        assert_eq!(err, JoinRefused::EmptyDocumentId);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.room_of(a).is_none());
    }

    #[test]
    fn test_room_capacity() {
        let mut registry = RoomRegistry::new().with_max_members(1);
        registry.join(ConnectionId::new(), "doc1", Identity::new("u1", "Alice")).unwrap();

        let err = registry
            .join(ConnectionId::new(), "doc1", Identity::new("u2", "Bob"))
            .unwrap_err();
        assert!(matches!(err, JoinRefused::RoomFull { capacity: 1, .. }));

        // Other rooms are unaffected
        assert!(registry.join(ConnectionId::new(), "doc2", Identity::new("u2", "Bob")).is_ok());
    }

    #[test]
    fn test_leave_removes_in_place() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();

        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(b, "doc1", Identity::new("u2", "Bob")).unwrap();
        registry.join(c, "doc1", Identity::new("u3", "Carol")).unwrap();

        let roster = registry.leave(b).unwrap();
        assert_eq!(ids(&roster), vec!["u1", "u3"]);
        assert_eq!(registry.members_of("doc1"), &[a, c]);
        assert!(registry.room_of(b).is_none());
    }

    #[test]
    fn test_leave_unknown_handle() {
        let mut registry = RoomRegistry::new();
        assert!(registry.leave(ConnectionId::new()).is_none());
    }

    #[test]
    fn test_last_leave_drops_room() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();

        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        assert!(registry.leave(a).is_none());
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.joined_count(), 0);
        assert!(registry.roster_of("doc1").is_empty());
    }

    #[test]
    fn test_unconditional_policy_drops_shared_identity() {
        let mut registry = RoomRegistry::with_policy(RosterPolicy::Unconditional);
        let tab1 = ConnectionId::new();
        let tab2 = ConnectionId::new();
        let bob = ConnectionId::new();

        registry.join(tab1, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(tab2, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(bob, "doc1", Identity::new("u2", "Bob")).unwrap();

        // u1 disappears although tab2 is still connected
        let roster = registry.leave(tab1).unwrap();
        assert_eq!(ids(&roster), vec!["u2"]);
        assert_eq!(registry.members_of("doc1"), &[tab2, bob]);

        // The remaining tab leaving is harmless
        let roster = registry.leave(tab2).unwrap();
        assert_eq!(ids(&roster), vec!["u2"]);
    }

    #[test]
    fn test_ref_counted_policy_keeps_shared_identity() {
        let mut registry = RoomRegistry::with_policy(RosterPolicy::RefCounted);
        assert_eq!(registry.policy(), RosterPolicy::RefCounted);
        let tab1 = ConnectionId::new();
        let tab2 = ConnectionId::new();
        let bob = ConnectionId::new();

        registry.join(tab1, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(tab2, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(bob, "doc1", Identity::new("u2", "Bob")).unwrap();

        let roster = registry.leave(tab1).unwrap();
        assert_eq!(ids(&roster), vec!["u1", "u2"]);

        let roster = registry.leave(tab2).unwrap();
        assert_eq!(ids(&roster), vec!["u2"]);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let c = ConnectionId::new();

        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(c, "doc2", Identity::new("u3", "Carol")).unwrap();

        assert_eq!(registry.members_of("doc1"), &[a]);
        assert_eq!(registry.members_of("doc2"), &[c]);
        assert!(registry.contains_identity("doc1", "u1"));
        assert!(!registry.contains_identity("doc1", "u3"));

        let mut docs = registry.active_documents();
        docs.sort();
        assert_eq!(docs, vec!["doc1".to_string(), "doc2".to_string()]);
    }

    #[test]
    fn test_fresh_registry_rebuilds_from_joins() {
        let mut registry = RoomRegistry::new();
        registry.join(ConnectionId::new(), "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(ConnectionId::new(), "doc1", Identity::new("u2", "Bob")).unwrap();

        // Process restart: all in-memory state is gone
        let mut registry = RoomRegistry::new();
        let roster = registry.join(ConnectionId::new(), "doc1", Identity::new("u3", "Carol")).unwrap();
        assert_eq!(ids(&roster), vec!["u3"]);
    }

    #[test]
    fn test_roster_policy_from_str() {
        assert_eq!("unconditional".parse::<RosterPolicy>(), Ok(RosterPolicy::Unconditional));
        assert_eq!("ref-counted".parse::<RosterPolicy>(), Ok(RosterPolicy::RefCounted));
        assert_eq!("RefCounted".parse::<RosterPolicy>(), Ok(RosterPolicy::RefCounted));
        assert!("sometimes".parse::<RosterPolicy>().is_err());
    }

    #[test]
    fn test_identity_of() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        assert_eq!(registry.identity_of(a).map(|i| i.id.as_str()), Some("u1"));
        assert!(registry.identity_of(ConnectionId::new()).is_none());
    }
}
