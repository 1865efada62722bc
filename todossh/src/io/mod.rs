//! Side-effecting helpers: configuration and the task and credential stores.

pub mod atomic;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod task_store;
