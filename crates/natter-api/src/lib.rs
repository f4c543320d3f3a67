//! REST transport: axum handlers over the shared services.

pub mod auth;
pub mod chats;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use natter_core::Services;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub services: Services,
}

impl AppStateInner {
    pub fn new(services: Services) -> AppState {
        Arc::new(Self { services })
    }
}
