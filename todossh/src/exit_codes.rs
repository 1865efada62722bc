//! Stable exit codes for the server process and for SSH session exit status.

/// Session ended by the user (Ctrl-C or end-of-input), or clean server shutdown.
pub const OK: i32 = 0;
/// Invalid config, failed startup, or a session ended by an internal error.
pub const ERROR: i32 = 1;
