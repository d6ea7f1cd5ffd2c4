//! Presence tracking: roster pushes on join and leave.
//!
//! ## Data flow
//!
//! ```text
//! join / leave
//!      │
//!      ▼
//! RoomRegistry ── roster after change
//!      │
//!      ▼
//! PresenceTracker ── update-user-list (full roster) ─▶ every member
//!      │
//!      └─ clear-cursor (opt-in) ─▶ remaining members
//! ```
//!
//! The roster is always sent whole, including to the connection whose join
//! triggered it.

use crate::broadcast::Broadcast;
use crate::protocol::{CursorCleared, Identity, ServerEvent};
use crate::registry::{Roster, RoomRegistry};

#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceTracker {
    /// Tell remaining members to drop the departed identity's caret.
    clear_cursor_on_leave: bool,
}

impl PresenceTracker {
    pub fn new(clear_cursor_on_leave: bool) -> Self {
        Self {
            clear_cursor_on_leave,
        }
    }

    /// Roster push after a successful join.
    pub fn on_join(&self, registry: &RoomRegistry, document_id: &str, roster: Roster) -> Broadcast {
        Broadcast::to_all(registry.members_of(document_id), ServerEvent::UpdateUserList(roster))
    }

    /// Pushes after a leave. `roster` is `None` when the room emptied.
    pub fn on_leave(
        &self,
        registry: &RoomRegistry,
        document_id: &str,
        departed: &Identity,
        roster: Option<Roster>,
    ) -> Vec<Broadcast> {
        let Some(roster) = roster else {
            return Vec::new();
        };
        let members = registry.members_of(document_id);

        let still_present = roster.iter().any(|i| i.id == departed.id);
        let mut pushes = vec![Broadcast::to_all(members, ServerEvent::UpdateUserList(roster))];

        if self.clear_cursor_on_leave && !still_present {
            pushes.push(Broadcast::to_all(
                members,
                ServerEvent::ClearCursor(CursorCleared {
                    identity_id: departed.id.clone(),
                }),
            ));
        }
        pushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionId, RosterPolicy};

    #[test]
    fn test_join_pushes_to_every_member() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        let roster = registry.join(b, "doc1", Identity::new("u2", "Bob")).unwrap();

        let push = PresenceTracker::default().on_join(&registry, "doc1", roster.clone());
        assert_eq!(push.targets, vec![a, b]);
        assert_eq!(push.event, ServerEvent::UpdateUserList(roster));
    }

    #[test]
    fn test_leave_pushes_remaining_roster() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(b, "doc1", Identity::new("u2", "Bob")).unwrap();

        let departed = registry.identity_of(b).cloned().unwrap();
        let roster = registry.leave(b);
        let pushes = PresenceTracker::default().on_leave(&registry, "doc1", &departed, roster);

        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].targets, vec![a]);
        assert_eq!(
            pushes[0].event,
            ServerEvent::UpdateUserList(vec![Identity::new("u1", "Alice")])
        );
    }

    #[test]
    fn test_leave_of_last_member_pushes_nothing() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();

        let departed = Identity::new("u1", "Alice");
        let roster = registry.leave(a);
        assert!(PresenceTracker::new(true)
            .on_leave(&registry, "doc1", &departed, roster)
            .is_empty());
    }

    #[test]
    fn test_clear_cursor_on_leave() {
        let mut registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.join(a, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(b, "doc1", Identity::new("u2", "Bob")).unwrap();

        let departed = Identity::new("u2", "Bob");
        let roster = registry.leave(b);
        let pushes = PresenceTracker::new(true).on_leave(&registry, "doc1", &departed, roster);

        assert_eq!(pushes.len(), 2);
        assert_eq!(
            pushes[1].event,
            ServerEvent::ClearCursor(CursorCleared { identity_id: "u2".into() })
        );
        assert_eq!(pushes[1].targets, vec![a]);
    }

    #[test]
    fn test_no_clear_cursor_while_identity_remains() {
        let mut registry = RoomRegistry::with_policy(RosterPolicy::RefCounted);
        let tab1 = ConnectionId::new();
        let tab2 = ConnectionId::new();
        registry.join(tab1, "doc1", Identity::new("u1", "Alice")).unwrap();
        registry.join(tab2, "doc1", Identity::new("u1", "Alice")).unwrap();

        let departed = Identity::new("u1", "Alice");
        let roster = registry.leave(tab1);
        let pushes = PresenceTracker::new(true).on_leave(&registry, "doc1", &departed, roster);

        assert_eq!(pushes.len(), 1);
        assert!(matches!(pushes[0].event, ServerEvent::UpdateUserList(_)));
    }
}
