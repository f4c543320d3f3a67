use natter_types::events::ServerEvent;
use natter_types::models::UserId;

/// Outbound seam from the services to the realtime layer. Implementations
/// must not block: they are called while the store's writer lock is held.
pub trait Notifier: Send + Sync {
    /// Deliver to every session of `user_id` (its personal channel).
    fn to_user(&self, user_id: &str, event: ServerEvent);

    /// Deliver to every session that joined the room of `chat_id`.
    fn to_room(&self, chat_id: &str, event: ServerEvent);

    /// Drop the sessions of these users from the room of `chat_id`.
    fn evict(&self, chat_id: &str, user_ids: &[UserId]);
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        User(String, ServerEvent),
        Room(String, ServerEvent),
        Evict(String, Vec<UserId>),
    }

    /// Captures everything the services publish.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Sent>>,
    }

    impl RecordingNotifier {
        pub fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Notifier for RecordingNotifier {
        fn to_user(&self, user_id: &str, event: ServerEvent) {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::User(user_id.to_string(), event));
        }

        fn to_room(&self, chat_id: &str, event: ServerEvent) {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Room(chat_id.to_string(), event));
        }

        fn evict(&self, chat_id: &str, user_ids: &[UserId]) {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Evict(chat_id.to_string(), user_ids.to_vec()));
        }
    }
}
