//! User credentials persisted in `<data_dir>/users.json`.
//!
//! Passwords are stored as bcrypt hashes; the salt and cost live inside the
//! hash string.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::io::atomic::write_atomic;
use crate::io::error::{StoreError, validate_username};

pub use bcrypt::DEFAULT_COST as DEFAULT_HASH_COST;
/// Cheapest cost bcrypt accepts.
pub const MIN_HASH_COST: u32 = 4;
pub const MAX_HASH_COST: u32 = 31;

/// One stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// bcrypt hash in modular crypt format (`$2b$<cost>$...`).
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(username: &str, password: &str, cost: u32) -> Result<Self, StoreError> {
        let password_hash = bcrypt::hash(password, cost).context("hash password")?;
        Ok(Self {
            username: username.to_string(),
            password_hash,
            created_at: Utc::now(),
        })
    }

    /// True when `password` matches the stored hash. A malformed hash never matches.
    pub fn verify(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

/// Credential lookups and registration keyed by username.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, user: &str) -> Result<Option<UserRecord>, StoreError>;

    /// False for unknown users and wrong passwords alike.
    fn authenticate(&self, user: &str, password: &str) -> Result<bool, StoreError> {
        Ok(self
            .lookup(user)?
            .is_some_and(|record| record.verify(password)))
    }

    /// Create the record for `user`.
    ///
    /// Never replaces an existing record: a second registration for the same
    /// name fails with [`StoreError::AlreadyRegistered`].
    fn register(&self, user: &str, password: &str) -> Result<(), StoreError>;
}

/// JSON-file credential store. The whole map is loaded at open.
pub struct JsonCredentialStore {
    path: PathBuf,
    cost: u32,
    users: RwLock<BTreeMap<String, UserRecord>>,
}

impl JsonCredentialStore {
    /// Open `<data_dir>/users.json`; new passwords are hashed at `cost`.
    pub fn open(data_dir: &Path, cost: u32) -> anyhow::Result<Self> {
        let path = data_dir.join("users.json");
        let users = load_users(&path)?;
        info!(path = %path.display(), users = users.len(), "credential store opened");
        Ok(Self {
            path,
            cost,
            users: RwLock::new(users),
        })
    }
}

fn load_users(path: &Path) -> anyhow::Result<BTreeMap<String, UserRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

impl CredentialStore for JsonCredentialStore {
    fn lookup(&self, user: &str) -> Result<Option<UserRecord>, StoreError> {
        validate_username(user)?;
        Ok(self.users.read().get(user).cloned())
    }

    fn register(&self, user: &str, password: &str) -> Result<(), StoreError> {
        validate_username(user)?;
        // Hash outside the lock; bcrypt is slow on purpose.
        let record = UserRecord::new(user, password, self.cost)?;

        let mut users = self.users.write();
        if users.contains_key(user) {
            warn!(user, "refusing to replace existing credential");
            return Err(StoreError::AlreadyRegistered(user.to_string()));
        }
        let mut next = users.clone();
        next.insert(user.to_string(), record);
        let mut buf = serde_json::to_string_pretty(&next).context("serialize users")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        *users = next;
        info!(user, "user registered");
        Ok(())
    }
}

/// In-memory credential store for tests and embedding.
///
/// Hashes at [`MIN_HASH_COST`] unless built with [`MemoryCredentialStore::with_cost`].
pub struct MemoryCredentialStore {
    cost: u32,
    users: RwLock<BTreeMap<String, UserRecord>>,
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::with_cost(MIN_HASH_COST)
    }
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cost(cost: u32) -> Self {
        Self {
            cost,
            users: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store seeded with one registered user.
    pub fn with_user(user: &str, password: &str) -> Result<Self, StoreError> {
        let store = Self::new();
        store.register(user, password)?;
        Ok(store)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, user: &str) -> Result<Option<UserRecord>, StoreError> {
        validate_username(user)?;
        Ok(self.users.read().get(user).cloned())
    }

    fn register(&self, user: &str, password: &str) -> Result<(), StoreError> {
        validate_username(user)?;
        let record = UserRecord::new(user, password, self.cost)?;
        let mut users = self.users.write();
        if users.contains_key(user) {
            return Err(StoreError::AlreadyRegistered(user.to_string()));
        }
        users.insert(user.to_string(), record);
        Ok(())
    }
}
