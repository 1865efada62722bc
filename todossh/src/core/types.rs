//! Shared deterministic types for the session core.
//!
//! These types define the contracts between the decoder, the state machine and
//! the renderer. They carry no I/O handles and compare by value so tests can
//! assert on them directly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal width used until the client negotiates a size.
pub const DEFAULT_WIDTH: u16 = 80;
/// Terminal height used until the client negotiates a size.
pub const DEFAULT_HEIGHT: u16 = 24;
/// Largest dimension accepted from a client; larger reports are capped.
pub const MAX_DIMENSION: u16 = 1000;
/// Minimum password length enforced during registration.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

/// A single task owned by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Visible terminal dimensions for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u16,
    pub height: u16,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl Viewport {
    /// Build a viewport from client-reported dimensions.
    ///
    /// Clients report `0` when a dimension is unknown; those fall back to the
    /// defaults. Values above [`MAX_DIMENSION`] are capped.
    pub fn from_client(width: u32, height: u32) -> Self {
        let clamp = |value: u32, default: u16| match value {
            0 => default,
            v => u16::try_from(v).map_or(MAX_DIMENSION, |v| v.min(MAX_DIMENSION)),
        };
        Self {
            width: clamp(width, DEFAULT_WIDTH),
            height: clamp(height, DEFAULT_HEIGHT),
        }
    }
}

/// A decoded, semantically meaningful input unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// Printable ASCII byte (`0x20..=0x7E`).
    Printable(u8),
    Enter,
    Backspace,
    Delete,
    Tab,
    /// Ctrl-C.
    Interrupt,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    /// The transport signalled end-of-stream. No events follow.
    EndOfInput,
}

/// Store mutation requested by the state machine and executed by the session loop.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreCommand {
    AddTask(String),
    UpdateTask { id: u64, text: String },
    ToggleTask(u64),
    DeleteTask(u64),
    RegisterCredential { username: String, password: String },
}

// Passwords never reach logs or assertion output.
impl fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTask(text) => f.debug_tuple("AddTask").field(text).finish(),
            Self::UpdateTask { id, text } => f
                .debug_struct("UpdateTask")
                .field("id", id)
                .field("text", text)
                .finish(),
            Self::ToggleTask(id) => f.debug_tuple("ToggleTask").field(id).finish(),
            Self::DeleteTask(id) => f.debug_tuple("DeleteTask").field(id).finish(),
            Self::RegisterCredential { username, .. } => f
                .debug_struct("RegisterCredential")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// What an edit session will write back on Enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    NewTask,
    ExistingTask(u64),
}

/// Step of the first-login password setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    SetPassword,
    ConfirmPassword,
}

/// Data that only exists while the user is registering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub step: RegistrationStep,
    /// Masked input typed so far.
    pub buffer: String,
    /// First entry, staged until it is confirmed.
    pub pending_password: Option<String>,
    /// Error shown inline; the next keypress dismisses it.
    pub notice: Option<String>,
}

impl Registration {
    pub fn new() -> Self {
        Self {
            step: RegistrationStep::SetPassword,
            buffer: String::new(),
            pending_password: None,
            notice: None,
        }
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-line text editor state used by `Mode::Editing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBuffer {
    pub target: EditTarget,
    pub text: String,
    /// Character offset into `text`, at most `text.chars().count()`.
    pub cursor: usize,
}

/// UI mode; each variant owns the fields that are meaningful in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Registering(Registration),
    Browsing,
    Editing(EditBuffer),
}

/// Per-connection UI state. Never shared between sessions, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Authenticated username; keys both stores.
    pub identity: String,
    pub mode: Mode,
    /// Index into the current snapshot; `0` when the snapshot is empty.
    pub selected: usize,
    pub viewport: Viewport,
    /// One-line status shown on the next Browsing/Editing frame.
    pub status: Option<String>,
    pub min_password_len: usize,
}

impl SessionState {
    /// State for a user that already has a stored credential.
    pub fn browsing(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            mode: Mode::Browsing,
            selected: 0,
            viewport: Viewport::default(),
            status: None,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }

    /// State for a user that must set a password first.
    pub fn registering(identity: impl Into<String>) -> Self {
        Self {
            mode: Mode::Registering(Registration::new()),
            ..Self::browsing(identity)
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_min_password_len(mut self, min_password_len: usize) -> Self {
        self.min_password_len = min_password_len;
        self
    }

    /// Re-clamp the selection after the snapshot changed underneath it.
    pub fn clamp_selection(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_viewport_defaults_unknown_dimensions() {
        assert_eq!(Viewport::from_client(0, 0), Viewport::default());
        assert_eq!(
            Viewport::from_client(120, 0),
            Viewport {
                width: 120,
                height: DEFAULT_HEIGHT
            }
        );
    }

    #[test]
    fn client_viewport_is_capped() {
        let capped = Viewport {
            width: MAX_DIMENSION,
            height: MAX_DIMENSION,
        };
        assert_eq!(Viewport::from_client(u32::MAX, u32::MAX), capped);
        assert_eq!(Viewport::from_client(65_535, 1001), capped);
        assert_eq!(Viewport::from_client(1000, 999).height, 999);
    }

    #[test]
    fn store_command_debug_redacts_password() {
        let command = StoreCommand::RegisterCredential {
            username: "bob".to_string(),
            password: "hunter22".to_string(),
        };
        let text = format!("{command:?}");
        assert!(text.contains("bob"));
        assert!(!text.contains("hunter22"));
    }
}
