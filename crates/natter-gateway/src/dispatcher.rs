use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use natter_core::Notifier;
use natter_types::events::ServerEvent;
use natter_types::models::{ChatId, UserId};

use crate::rooms::{Room, RoomRegistry, SessionId};

/// Routes events to connected sessions by room.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    rooms: RoomRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_registry(RoomRegistry::new())
    }

    pub fn with_registry(rooms: RoomRegistry) -> Self {
        Self {
            inner: Arc::new(DispatcherInner { rooms }),
        }
    }

    /// Register a session for `user_id`. Returns (session_id, receiver).
    pub fn connect(&self, user_id: &str) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = self.inner.rooms.register(user_id, tx);
        (session_id, rx)
    }

    /// Remove a session. Every chat room it had joined gets a
    /// `typing:stop` for its user so no indicator is left dangling.
    /// Returns the chat ids the session was in.
    pub fn disconnect(&self, session_id: SessionId) -> Vec<ChatId> {
        let Some((user_id, rooms)) = self.inner.rooms.unregister(session_id) else {
            return Vec::new();
        };

        let chat_ids: Vec<ChatId> = rooms
            .into_iter()
            .filter_map(|room| match room {
                Room::Chat(chat_id) => Some(chat_id),
                Room::User(_) => None,
            })
            .collect();

        for chat_id in &chat_ids {
            self.emit_to_room(
                chat_id,
                ServerEvent::TypingStop {
                    chat_id: chat_id.clone(),
                    user_id: user_id.clone(),
                },
            );
        }
        chat_ids
    }

    pub fn join_chat(&self, session_id: SessionId, chat_id: &str) -> bool {
        self.inner.rooms.join(session_id, Room::Chat(chat_id.to_string()))
    }

    pub fn in_chat(&self, session_id: SessionId, chat_id: &str) -> bool {
        self.inner
            .rooms
            .contains(session_id, &Room::Chat(chat_id.to_string()))
    }

    pub fn rooms_of(&self, session_id: SessionId) -> Vec<Room> {
        self.inner.rooms.rooms_of(session_id)
    }

    /// Reply on one session only (acks, `ready`).
    pub fn send_to_session(&self, session_id: SessionId, event: ServerEvent) -> bool {
        self.inner.rooms.send_to_session(session_id, event)
    }

    pub fn emit_to_user(&self, user_id: &str, event: ServerEvent) {
        let delivered = self
            .inner
            .rooms
            .broadcast(&Room::User(user_id.to_string()), &event, None);
        trace!("{} -> user {} ({} sessions)", event.name(), user_id, delivered);
    }

    pub fn emit_to_room(&self, chat_id: &str, event: ServerEvent) {
        let delivered = self
            .inner
            .rooms
            .broadcast(&Room::Chat(chat_id.to_string()), &event, None);
        trace!("{} -> chat {} ({} sessions)", event.name(), chat_id, delivered);
    }

    pub fn emit_to_room_except(&self, chat_id: &str, event: ServerEvent, except: SessionId) {
        let delivered =
            self.inner
                .rooms
                .broadcast(&Room::Chat(chat_id.to_string()), &event, Some(except));
        trace!("{} -> chat {} ({} sessions)", event.name(), chat_id, delivered);
    }

    pub fn session_count(&self) -> usize {
        self.inner.rooms.session_count()
    }
}

impl Notifier for Dispatcher {
    fn to_user(&self, user_id: &str, event: ServerEvent) {
        self.emit_to_user(user_id, event);
    }

    fn to_room(&self, chat_id: &str, event: ServerEvent) {
        self.emit_to_room(chat_id, event);
    }

    fn evict(&self, chat_id: &str, user_ids: &[UserId]) {
        let evicted = self
            .inner
            .rooms
            .evict(&Room::Chat(chat_id.to_string()), user_ids);
        if evicted > 0 {
            debug!("Evicted {} sessions from chat {}", evicted, chat_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_channel_reaches_every_session_of_user() {
        let dispatcher = Dispatcher::new();
        let (_, mut first) = dispatcher.connect("u1");
        let (_, mut second) = dispatcher.connect("u1");
        let (_, mut other) = dispatcher.connect("u2");

        let event = ServerEvent::Ready { user_id: "u1".into() };
        dispatcher.to_user("u1", event.clone());

        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap(), event);
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn room_events_need_a_join() {
        let dispatcher = Dispatcher::new();
        let (a, mut rx_a) = dispatcher.connect("u1");
        let (_, mut rx_b) = dispatcher.connect("u2");
        assert!(dispatcher.join_chat(a, "c1"));
        assert!(dispatcher.in_chat(a, "c1"));

        let event = ServerEvent::TypingStop {
            chat_id: "c1".into(),
            user_id: "u2".into(),
        };
        dispatcher.to_room("c1", event.clone());

        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn disconnect_stops_typing_in_joined_rooms() {
        let dispatcher = Dispatcher::new();
        let (leaver, _rx) = dispatcher.connect("u1");
        let (watcher, mut rx) = dispatcher.connect("u2");
        for chat in ["c1", "c2"] {
            dispatcher.join_chat(leaver, chat);
        }
        dispatcher.join_chat(watcher, "c1");

        let mut left = dispatcher.disconnect(leaver);
        left.sort();
        assert_eq!(left, vec!["c1", "c2"]);

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::TypingStop {
                chat_id: "c1".into(),
                user_id: "u1".into(),
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.session_count(), 1);
        assert!(dispatcher.disconnect(leaver).is_empty());
    }

    #[test]
    fn evict_removes_room_membership() {
        let dispatcher = Dispatcher::new();
        let (a, mut rx) = dispatcher.connect("u3");
        dispatcher.join_chat(a, "c1");

        dispatcher.evict("c1", &["u3".to_string()]);
        assert!(!dispatcher.in_chat(a, "c1"));

        dispatcher.to_room(
            "c1",
            ServerEvent::TypingStart {
                chat_id: "c1".into(),
                user_id: "u1".into(),
            },
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.rooms_of(a), vec![Room::User("u3".into())]);
    }
}
