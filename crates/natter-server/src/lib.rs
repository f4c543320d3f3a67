//! Process bootstrap for the natter chat backend: configuration and the
//! assembled HTTP + WebSocket router.

pub mod app;
pub mod config;
