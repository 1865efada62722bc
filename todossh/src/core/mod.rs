//! Deterministic, pure logic for one interactive session.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests: the
//! decoder turns bytes into key events, the state machine turns key events into
//! state changes plus store commands, and the renderer turns state into bytes.

pub mod decoder;
pub mod render;
pub mod types;
pub mod update;
