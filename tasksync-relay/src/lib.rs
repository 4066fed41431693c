//! `tasksync` relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, stores task documents per
//! collection and pushes collection snapshots to subscribed clients.

pub mod config;
pub mod relay;
pub mod store;
