//! `tasksync` library: the offline-first synchronization engine.
//!
//! The [`repository::TaskRepository`] owns the task collection and drives
//! the other components: [`store`] for durable local state, [`remote`] for
//! the shared document store, [`merge`] for reconciling snapshots,
//! [`notify`] for reminders and [`connectivity`] for online/offline
//! transitions.

pub mod config;
pub mod connectivity;
pub mod identity;
pub mod merge;
pub mod notify;
pub mod remote;
pub mod repository;
pub mod stats;
pub mod store;
