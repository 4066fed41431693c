//! Shared definitions for `tasksync`: the task record, the remote document
//! schema and the relay wire format.

pub mod document;
pub mod task;
pub mod wire;
