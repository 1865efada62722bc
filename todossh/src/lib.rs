//! Interactive todo-list sessions served over SSH.
//!
//! Each connection gets an isolated session: keystrokes are decoded into key
//! events, applied to a per-session state machine, and the screen is repainted
//! after every change. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decoding, state transitions,
//!   rendering). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (configuration, task and credential
//!   stores on disk).
//!
//! [`session`] coordinates the two for one connection and exchanges messages
//! with whatever transport carries the bytes.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
