//! Typed errors at the store boundary.

use thiserror::Error;

/// Failure reported by a task or credential store.
///
/// The session loop branches on the variant: stale ids are dropped, anything
/// else is surfaced to the user.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The id does not exist for this user (for example, deleted by another session).
    #[error("task {id} not found")]
    NotFound { id: u64 },

    /// The username cannot key a store record.
    #[error("invalid username {0:?}")]
    InvalidUser(String),

    /// A credential already exists for this username.
    #[error("user {0:?} is already registered")]
    AlreadyRegistered(String),

    /// Backing storage failed; the context chain names the file and operation.
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Reject usernames that could escape the data directory or corrupt a record key.
pub fn validate_username(user: &str) -> Result<(), StoreError> {
    let invalid = user.is_empty()
        || user.contains(['/', '\\'])
        || user.contains("..")
        || user.chars().any(char::is_control);
    if invalid {
        return Err(StoreError::InvalidUser(user.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for user in ["alice", "bob.smith", "user-42", "ÅSA"] {
            validate_username(user).expect(user);
        }
    }

    #[test]
    fn rejects_path_like_and_control_names() {
        for user in ["", "../etc", "a/b", "a\\b", "..", "tab\there", "nul\0"] {
            let err = validate_username(user).expect_err(user);
            assert!(matches!(err, StoreError::InvalidUser(_)), "{user:?}");
        }
    }

    #[test]
    fn persistence_displays_inner_error() {
        let err = StoreError::from(anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_not_found());
        assert!(StoreError::NotFound { id: 3 }.is_not_found());
    }

    #[test]
    fn already_registered_names_the_user() {
        let err = StoreError::AlreadyRegistered("bob".to_string());
        assert_eq!(err.to_string(), "user \"bob\" is already registered");
        assert!(!err.is_not_found());
    }
}
