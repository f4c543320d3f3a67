//! Chat, message and friend-graph services shared by the REST and gateway
//! transports.

pub mod chats;
pub mod error;
pub mod friends;
pub mod identity;
pub mod ledger;
pub mod notify;
mod resolve;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use natter_db::Database;
use tracing::error;

pub use chats::{ChatRegistry, ChatUpdate, NewChat};
pub use error::{CoreError, Result};
pub use friends::FriendGraph;
pub use identity::IdentityGate;
pub use ledger::MessageLedger;
pub use notify::Notifier;

/// Everything a transport adapter needs, cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub identity: IdentityGate,
    pub friends: FriendGraph,
    pub chats: ChatRegistry,
    pub ledger: MessageLedger,
}

impl Services {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>, identity: IdentityGate) -> Self {
        Self {
            friends: FriendGraph::new(db.clone()),
            chats: ChatRegistry::new(db.clone(), notifier.clone()),
            ledger: MessageLedger::new(db.clone(), notifier),
            identity,
            db,
        }
    }
}

/// Run blocking store work off the async runtime.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            CoreError::Internal(e.into())
        })?
}

/// Current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use natter_db::models::UserRow;
    use natter_db::{Database, queries, to_db_time};

    use crate::notify::recording::RecordingNotifier;
    use crate::{IdentityGate, Services};

    pub struct Fixture {
        pub services: Services,
        pub notifier: Arc<RecordingNotifier>,
    }

    pub fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = Services::new(db, notifier.clone(), IdentityGate::new("test-secret"));
        Fixture { services, notifier }
    }

    impl Fixture {
        /// Inserts a user whose id doubles as its username.
        pub fn user(&self, id: &str) -> String {
            let row = UserRow {
                id: id.to_string(),
                username: id.to_string(),
                name: id.to_uppercase(),
                email: format!("{}@example.com", id),
                password: "not-a-hash".to_string(),
                created_at: to_db_time(crate::now()),
            };
            self.services
                .db
                .with_conn(|conn| queries::insert_user(conn, &row))
                .unwrap();
            id.to_string()
        }
    }
}
