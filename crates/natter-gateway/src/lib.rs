//! WebSocket gateway: session rooms, event fan-out and the per-connection
//! command loop.

pub mod connection;
pub mod dispatcher;
pub mod rooms;

pub use dispatcher::Dispatcher;
pub use rooms::{Room, RoomRegistry, SessionId};
