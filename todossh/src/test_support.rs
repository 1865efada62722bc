//! Test-only helpers: deterministic tasks, failing stores and a session harness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::types::{Task, Viewport};
use crate::io::credential_store::{CredentialStore, MemoryCredentialStore, UserRecord};
use crate::io::error::StoreError;
use crate::io::task_store::{MemoryTaskStore, TaskStore};
use crate::session::{CHANNEL_CAPACITY, Inbound, Outbound, SessionContext, SessionEnd, run_session};

/// Create a task with fixed timestamps.
pub fn task(id: u64, text: &str, completed: bool) -> Task {
    Task {
        id,
        text: text.to_string(),
        completed,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

fn disk_full() -> StoreError {
    StoreError::Persistence(anyhow!("disk full"))
}

/// In-memory task store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyTaskStore {
    inner: MemoryTaskStore,
    fail_writes: AtomicBool,
}

impl FlakyTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        Ok(())
    }
}

impl TaskStore for FlakyTaskStore {
    fn list(&self, user: &str) -> Result<Vec<Task>, StoreError> {
        self.inner.list(user)
    }

    fn add(&self, user: &str, text: &str) -> Result<Task, StoreError> {
        self.check()?;
        self.inner.add(user, text)
    }

    fn update(&self, user: &str, id: u64, text: &str) -> Result<Task, StoreError> {
        self.check()?;
        self.inner.update(user, id, text)
    }

    fn delete(&self, user: &str, id: u64) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(user, id)
    }

    fn toggle_complete(&self, user: &str, id: u64) -> Result<Task, StoreError> {
        self.check()?;
        self.inner.toggle_complete(user, id)
    }
}

/// Credential store that knows nobody and fails the chosen operation.
pub enum BrokenCredentialStore {
    /// `lookup` fails.
    Lookup,
    /// `lookup` finds nobody, `register` fails.
    Register,
}

impl CredentialStore for BrokenCredentialStore {
    fn lookup(&self, _user: &str) -> Result<Option<UserRecord>, StoreError> {
        match self {
            Self::Lookup => Err(disk_full()),
            Self::Register => Ok(None),
        }
    }

    fn register(&self, _user: &str, _password: &str) -> Result<(), StoreError> {
        Err(disk_full())
    }
}

/// A session running on a spawned task, driven through its message queues.
pub struct SessionHarness {
    input: mpsc::UnboundedSender<Inbound>,
    output: mpsc::Receiver<Outbound>,
    handle: JoinHandle<SessionEnd>,
}

impl SessionHarness {
    pub fn spawn(ctx: SessionContext, identity: &str, viewport: Viewport) -> Self {
        let (input, in_rx) = mpsc::unbounded_channel();
        let (out_tx, output) = mpsc::channel(CHANNEL_CAPACITY);
        let identity = identity.to_string();
        let handle = tokio::spawn(async move {
            run_session(&ctx, &identity, viewport, in_rx, out_tx).await
        });
        Self {
            input,
            output,
            handle,
        }
    }

    /// Send one transport read.
    pub async fn keys(&self, bytes: &[u8]) {
        self.send(Inbound::Data(bytes.to_vec())).await;
    }

    pub async fn send(&self, message: Inbound) {
        // The session may already have ended; later messages are moot.
        let _ = self.input.send(message);
    }

    /// Wait for the next output message.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.output.recv().await
    }

    /// Collect all output until the session ends. The caller must have sent
    /// something that ends it.
    pub async fn finish(mut self) -> (SessionEnd, Vec<Outbound>) {
        let mut outputs = Vec::new();
        while let Some(message) = self.output.recv().await {
            outputs.push(message);
        }
        let end = self.handle.await.expect("session task panicked");
        (end, outputs)
    }
}

/// Concatenate every `Data` message as text.
pub fn output_text(outputs: &[Outbound]) -> String {
    let mut bytes = Vec::new();
    for message in outputs {
        if let Outbound::Data(data) = message {
            bytes.extend_from_slice(data);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The last full frame written before teardown.
pub fn last_frame(outputs: &[Outbound]) -> String {
    let text = output_text(outputs);
    let frames: Vec<&str> = text.split("\x1b[2J").collect();
    frames.last().copied().unwrap_or_default().to_string()
}

/// Exit status reported to the transport, if any.
pub fn exit_status(outputs: &[Outbound]) -> Option<u32> {
    outputs.iter().find_map(|message| match message {
        Outbound::Exit(status) => Some(*status),
        Outbound::Data(_) => None,
    })
}

/// Context over `tasks` with `user` already registered in memory.
pub fn context_with_user(tasks: Arc<dyn TaskStore>, user: &str, password: &str) -> SessionContext {
    let credentials = MemoryCredentialStore::with_user(user, password).expect("seed user");
    SessionContext::new(tasks, Arc::new(credentials))
}
