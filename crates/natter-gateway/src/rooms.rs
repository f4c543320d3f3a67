use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use uuid::Uuid;

use natter_types::events::ServerEvent;
use natter_types::models::{ChatId, UserId};

pub type SessionId = Uuid;

/// A delivery group. Every session sits in its user's personal room and in
/// any chat rooms it joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(UserId),
    Chat(ChatId),
}

struct Session {
    user_id: UserId,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct Topology {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<Room, HashSet<SessionId>>,
}

impl Topology {
    fn join(&mut self, session_id: SessionId, room: Room) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if session.rooms.insert(room.clone()) {
            self.rooms.entry(room).or_default().insert(session_id);
        }
        true
    }

    fn leave(&mut self, session_id: SessionId, room: &Room) -> bool {
        let removed = self
            .sessions
            .get_mut(&session_id)
            .is_some_and(|session| session.rooms.remove(room));

        if removed {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&session_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        removed
    }
}

/// Process-local session and room membership.
///
/// Sends never block: each session owns an unbounded channel drained by its
/// socket task. A send to a session whose socket already went away is
/// dropped silently; the session is removed when its connection loop exits.
#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<Topology>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Topology> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Topology> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session and places it in its user's personal room.
    pub fn register(&self, user_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) -> SessionId {
        let session_id = Uuid::new_v4();
        let mut state = self.write();
        state.sessions.insert(
            session_id,
            Session {
                user_id: user_id.to_string(),
                tx,
                rooms: HashSet::new(),
            },
        );
        state.join(session_id, Room::User(user_id.to_string()));
        session_id
    }

    /// Removes a session from every room. Returns its user and the rooms it
    /// was in, or `None` if it was already gone.
    pub fn unregister(&self, session_id: SessionId) -> Option<(UserId, Vec<Room>)> {
        let mut state = self.write();
        let session = state.sessions.remove(&session_id)?;
        for room in &session.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&session_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        Some((session.user_id, session.rooms.into_iter().collect()))
    }

    pub fn join(&self, session_id: SessionId, room: Room) -> bool {
        self.write().join(session_id, room)
    }

    pub fn contains(&self, session_id: SessionId, room: &Room) -> bool {
        self.read()
            .sessions
            .get(&session_id)
            .is_some_and(|session| session.rooms.contains(room))
    }

    pub fn rooms_of(&self, session_id: SessionId) -> Vec<Room> {
        self.read()
            .sessions
            .get(&session_id)
            .map(|session| session.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops every session of the given users from `room`. Returns how many
    /// sessions were removed.
    pub fn evict(&self, room: &Room, user_ids: &[UserId]) -> usize {
        let mut state = self.write();
        let targets: Vec<SessionId> = match state.rooms.get(room) {
            Some(members) => members
                .iter()
                .filter(|id| {
                    state
                        .sessions
                        .get(id)
                        .is_some_and(|s| user_ids.contains(&s.user_id))
                })
                .copied()
                .collect(),
            None => return 0,
        };

        for session_id in &targets {
            state.leave(*session_id, room);
        }
        targets.len()
    }

    pub fn send_to_session(&self, session_id: SessionId, event: ServerEvent) -> bool {
        match self.read().sessions.get(&session_id) {
            Some(session) => session.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Delivers `event` to every session in `room` except `except`.
    /// Returns the number of sessions that accepted it.
    pub fn broadcast(&self, room: &Room, event: &ServerEvent, except: Option<SessionId>) -> usize {
        let state = self.read();
        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| state.sessions.get(id))
            .filter(|session| session.tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(chat_id: &str) -> ServerEvent {
        ServerEvent::TypingStart {
            chat_id: chat_id.into(),
            user_id: "u1".into(),
        }
    }

    #[test]
    fn register_joins_personal_room() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = registry.register("u1", tx);

        assert_eq!(registry.rooms_of(session), vec![Room::User("u1".into())]);
        assert_eq!(registry.broadcast(&Room::User("u1".into()), &typing("c1"), None), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn broadcast_skips_excluded_session() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register("u1", tx_a);
        let b = registry.register("u2", tx_b);
        let room = Room::Chat("c1".into());
        registry.join(a, room.clone());
        registry.join(b, room.clone());

        assert_eq!(registry.broadcast(&room, &typing("c1"), Some(a)), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), typing("c1"));
    }

    #[test]
    fn unregister_cleans_up_rooms() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.register("u1", tx);
        registry.join(session, Room::Chat("c1".into()));
        registry.join(session, Room::Chat("c1".into()));

        let (user_id, mut rooms) = registry.unregister(session).unwrap();
        rooms.sort_by_key(|r| format!("{:?}", r));
        assert_eq!(user_id, "u1");
        assert_eq!(rooms.len(), 2);

        assert_eq!(registry.broadcast(&Room::Chat("c1".into()), &typing("c1"), None), 0);
        assert!(registry.unregister(session).is_none());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn evict_targets_only_named_users() {
        let registry = RoomRegistry::new();
        let room = Room::Chat("c1".into());
        let mut receivers = Vec::new();
        let mut sessions = Vec::new();
        for user in ["u1", "u2", "u2"] {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = registry.register(user, tx);
            registry.join(session, room.clone());
            sessions.push(session);
            receivers.push(rx);
        }

        assert_eq!(registry.evict(&room, &["u2".to_string()]), 2);
        assert!(registry.contains(sessions[0], &room));
        assert!(!registry.contains(sessions[1], &room));
        // Personal room is untouched.
        assert!(registry.contains(sessions[2], &Room::User("u2".into())));
        assert_eq!(registry.evict(&Room::Chat("none".into()), &["u1".to_string()]), 0);
    }

    #[test]
    fn join_unknown_session_is_noop() {
        let registry = RoomRegistry::new();
        assert!(!registry.join(Uuid::new_v4(), Room::Chat("c1".into())));
        assert!(!registry.send_to_session(Uuid::new_v4(), typing("c1")));
    }
}
