//! Per-user task storage.
//!
//! [`JsonTaskStore`] keeps one file per user under `<data_dir>/tasks/` and a
//! lazily filled in-memory cache. A single store-wide lock serializes every
//! mutation, which keeps ids unique and increasing even when several sessions
//! for the same user write at once.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::types::Task;
use crate::io::atomic::write_atomic;
use crate::io::error::{StoreError, validate_username};

/// Task CRUD keyed by username. Implementations provide their own locking.
pub trait TaskStore: Send + Sync {
    /// All tasks for `user`, ascending by id.
    fn list(&self, user: &str) -> Result<Vec<Task>, StoreError>;
    fn add(&self, user: &str, text: &str) -> Result<Task, StoreError>;
    fn update(&self, user: &str, id: u64, text: &str) -> Result<Task, StoreError>;
    fn delete(&self, user: &str, id: u64) -> Result<(), StoreError>;
    fn toggle_complete(&self, user: &str, id: u64) -> Result<Task, StoreError>;
}

/// On-disk shape of one user's file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct UserTasks {
    tasks: BTreeMap<u64, Task>,
    next_id: u64,
}

impl Default for UserTasks {
    fn default() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl UserTasks {
    fn list(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    fn add(&mut self, text: &str) -> Task {
        let now = Utc::now();
        let task = Task {
            id: self.next_id,
            text: text.to_string(),
            completed: false,
            created_at: now,
            updated_at: now,
        };
        self.next_id += 1;
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn update(&mut self, id: u64, text: &str) -> Result<Task, StoreError> {
        let task = self.tasks.get_mut(&id).ok_or(StoreError::NotFound { id })?;
        task.text = text.to_string();
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    fn toggle(&mut self, id: u64) -> Result<Task, StoreError> {
        let task = self.tasks.get_mut(&id).ok_or(StoreError::NotFound { id })?;
        task.completed = !task.completed;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    fn delete(&mut self, id: u64) -> Result<(), StoreError> {
        self.tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { id })
    }

    /// Files edited by hand may carry a stale counter; never hand out a used id.
    fn repair_next_id(&mut self) {
        let floor = self.tasks.keys().next_back().map_or(1, |max| max + 1);
        self.next_id = self.next_id.max(floor);
    }
}

/// JSON-file task store.
pub struct JsonTaskStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, UserTasks>>,
}

impl JsonTaskStore {
    /// Open a store rooted at `<data_dir>/tasks`. Files are read on first use.
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let dir = data_dir.join("tasks");
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        info!(dir = %dir.display(), "task store opened");
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn user_path(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{user}.json"))
    }

    fn load_user(&self, user: &str) -> Result<UserTasks, StoreError> {
        let path = self.user_path(user);
        if !path.exists() {
            return Ok(UserTasks::default());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut tasks: UserTasks = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", path.display()))?;
        tasks.repair_next_id();
        debug!(user, count = tasks.tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    fn persist(&self, user: &str, tasks: &UserTasks) -> Result<(), StoreError> {
        let path = self.user_path(user);
        let mut buf = serde_json::to_string_pretty(tasks).context("serialize tasks")?;
        buf.push('\n');
        write_atomic(&path, &buf)?;
        Ok(())
    }

    /// Run `op` against a copy of the user's tasks and commit it only once the
    /// file has been written, so a failed write leaves the cache untouched.
    fn mutate<T>(
        &self,
        user: &str,
        op: impl FnOnce(&mut UserTasks) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        validate_username(user)?;
        let mut cache = self.cache.lock();
        let mut working = match cache.get(user) {
            Some(tasks) => tasks.clone(),
            None => self.load_user(user)?,
        };
        let out = op(&mut working)?;
        self.persist(user, &working)?;
        cache.insert(user.to_string(), working);
        Ok(out)
    }
}

impl TaskStore for JsonTaskStore {
    fn list(&self, user: &str) -> Result<Vec<Task>, StoreError> {
        validate_username(user)?;
        let mut cache = self.cache.lock();
        if let Some(tasks) = cache.get(user) {
            return Ok(tasks.list());
        }
        let tasks = self.load_user(user)?;
        let out = tasks.list();
        cache.insert(user.to_string(), tasks);
        Ok(out)
    }

    fn add(&self, user: &str, text: &str) -> Result<Task, StoreError> {
        let task = self.mutate(user, |tasks| Ok(tasks.add(text)))?;
        debug!(user, task_id = task.id, "task added");
        Ok(task)
    }

    fn update(&self, user: &str, id: u64, text: &str) -> Result<Task, StoreError> {
        self.mutate(user, |tasks| tasks.update(id, text))
    }

    fn delete(&self, user: &str, id: u64) -> Result<(), StoreError> {
        self.mutate(user, |tasks| tasks.delete(id))?;
        debug!(user, task_id = id, "task deleted");
        Ok(())
    }

    fn toggle_complete(&self, user: &str, id: u64) -> Result<Task, StoreError> {
        self.mutate(user, |tasks| tasks.toggle(id))
    }
}

/// In-memory task store with the same contract as [`JsonTaskStore`].
#[derive(Default)]
pub struct MemoryTaskStore {
    users: Mutex<HashMap<String, UserTasks>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_user<T>(
        &self,
        user: &str,
        op: impl FnOnce(&mut UserTasks) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        validate_username(user)?;
        let mut users = self.users.lock();
        op(users.entry(user.to_string()).or_default())
    }
}

impl TaskStore for MemoryTaskStore {
    fn list(&self, user: &str) -> Result<Vec<Task>, StoreError> {
        self.with_user(user, |tasks| Ok(tasks.list()))
    }

    fn add(&self, user: &str, text: &str) -> Result<Task, StoreError> {
        self.with_user(user, |tasks| Ok(tasks.add(text)))
    }

    fn update(&self, user: &str, id: u64, text: &str) -> Result<Task, StoreError> {
        self.with_user(user, |tasks| tasks.update(id, text))
    }

    fn delete(&self, user: &str, id: u64) -> Result<(), StoreError> {
        self.with_user(user, |tasks| tasks.delete(id))
    }

    fn toggle_complete(&self, user: &str, id: u64) -> Result<Task, StoreError> {
        self.with_user(user, |tasks| tasks.toggle(id))
    }
}
