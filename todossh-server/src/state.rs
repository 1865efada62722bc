//! Shared server state handed to every connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use todossh::io::config::ServerConfig;
use todossh::io::credential_store::JsonCredentialStore;
use todossh::io::task_store::JsonTaskStore;
use todossh::session::SessionContext;

/// State cloned into each connection handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionContext,
}

impl AppState {
    pub fn new(sessions: SessionContext) -> Self {
        Self { sessions }
    }

    /// Open the JSON stores under `cfg.data_dir`.
    pub fn open(cfg: &ServerConfig) -> Result<Self> {
        let tasks = JsonTaskStore::open(&cfg.data_dir).context("open task store")?;
        let credentials = JsonCredentialStore::open(&cfg.data_dir, cfg.password_hash_cost)
            .context("open credential store")?;
        let sessions = SessionContext::new(Arc::new(tasks), Arc::new(credentials))
            .with_min_password_len(cfg.min_password_len);
        Ok(Self::new(sessions))
    }
}
