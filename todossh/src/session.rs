//! Per-connection session loop.
//!
//! The loop owns the session state and is the only code that talks to the
//! stores or the transport. The transport feeds it [`Inbound`] messages
//! (keystroke bytes, resizes, end-of-stream) through one queue and drains
//! [`Outbound`] messages from another, so resizes and keystrokes are handled
//! by the same task and the viewport needs no lock.
//!
//! The inbound queue is unbounded: transports push from callbacks that must
//! never wait on the session. The outbound queue is bounded, so a slow client
//! holds the session back instead of buffering frames without limit.
//!
//! Every frame re-reads the task list, so changes made by other sessions of
//! the same user show up on the next redraw.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::decoder::Decoder;
use crate::core::render::{FAREWELL, enter_session, leave_session, render};
use crate::core::types::{
    DEFAULT_MIN_PASSWORD_LEN, KeyEvent, Mode, SessionState, StoreCommand, Task, Viewport,
};
use crate::core::update::apply;
use crate::exit_codes;
use crate::io::credential_store::CredentialStore;
use crate::io::task_store::TaskStore;

/// Depth of the outbound queue between a session and its transport.
pub const CHANNEL_CAPACITY: usize = 64;

/// Message from the transport to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One read from the client, possibly empty.
    Data(Vec<u8>),
    /// The client reported new terminal dimensions.
    Resize(Viewport),
    /// The client closed its side of the channel.
    Eof,
    /// The connection failed before a clean end-of-stream.
    Failed(String),
}

/// Message from the session to the transport, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Data(Vec<u8>),
    /// Final message: exit status for the channel.
    Exit(u32),
}

/// Shared handles every session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub tasks: Arc<dyn TaskStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub min_password_len: usize,
}

impl SessionContext {
    pub fn new(tasks: Arc<dyn TaskStore>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            tasks,
            credentials,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }

    pub fn with_min_password_len(mut self, min_password_len: usize) -> Self {
        self.min_password_len = min_password_len;
        self
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Ctrl-C.
    Interrupted,
    /// Clean end-of-stream from the client.
    EndOfInput,
    /// The credential could not be stored; the user cannot continue.
    RegistrationFailed(String),
    /// The credential lookup at session start failed.
    AccountUnavailable(String),
    /// The transport broke or went away.
    TransportFailed(String),
}

impl SessionEnd {
    pub fn exit_status(&self) -> u32 {
        match self {
            Self::Interrupted | Self::EndOfInput => exit_codes::OK as u32,
            Self::RegistrationFailed(_) | Self::AccountUnavailable(_) | Self::TransportFailed(_) => {
                exit_codes::ERROR as u32
            }
        }
    }

    /// Line printed above the farewell after the terminal is restored.
    fn explanation(&self) -> Option<String> {
        match self {
            Self::RegistrationFailed(reason) => Some(format!("Registration failed: {reason}")),
            Self::AccountUnavailable(reason) => {
                Some(format!("Could not load your account: {reason}"))
            }
            _ => None,
        }
    }
}

/// Drive one session until the user quits or the transport ends.
///
/// The terminal is always restored and an [`Outbound::Exit`] is always
/// attempted, whichever way the session ends.
pub async fn run_session(
    ctx: &SessionContext,
    identity: &str,
    viewport: Viewport,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
) -> SessionEnd {
    info!(user = %identity, width = viewport.width, height = viewport.height, "session started");
    let mut session = Session {
        ctx,
        state: SessionState::browsing(identity)
            .with_viewport(viewport)
            .with_min_password_len(ctx.min_password_len),
        snapshot: Vec::new(),
        decoder: Decoder::new(),
        outbound,
    };

    let end = match session.start().await {
        Ok(None) => session.run(inbound).await,
        Ok(Some(end)) => end,
        Err(err) => SessionEnd::TransportFailed(format!("{err:#}")),
    };

    session.teardown(&end).await;
    match &end {
        SessionEnd::Interrupted | SessionEnd::EndOfInput => {
            info!(user = %identity, ?end, "session ended");
        }
        _ => warn!(user = %identity, ?end, "session ended with error"),
    }
    end
}

struct Session<'a> {
    ctx: &'a SessionContext,
    state: SessionState,
    snapshot: Vec<Task>,
    decoder: Decoder,
    outbound: mpsc::Sender<Outbound>,
}

impl Session<'_> {
    /// Enter session mode and pick the initial mode. `Some` ends the session early.
    async fn start(&mut self) -> Result<Option<SessionEnd>> {
        self.send(enter_session()).await?;

        match self.ctx.credentials.lookup(&self.state.identity) {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(user = %self.state.identity, "no credential on file; registering");
                self.state.mode = Mode::Registering(Default::default());
            }
            Err(err) => {
                error!(user = %self.state.identity, error = %err, "credential lookup failed");
                return Ok(Some(SessionEnd::AccountUnavailable(err.to_string())));
            }
        }

        self.draw().await?;
        Ok(None)
    }

    async fn run(&mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) -> SessionEnd {
        loop {
            let Some(message) = inbound.recv().await else {
                return SessionEnd::TransportFailed("input channel closed".to_string());
            };
            let events = match message {
                Inbound::Data(bytes) => self.decoder.decode_chunk(&bytes),
                Inbound::Eof => self.decoder.finish().into_iter().collect(),
                Inbound::Resize(viewport) => {
                    debug!(user = %self.state.identity, ?viewport, "viewport changed");
                    self.state.viewport = viewport;
                    if let Err(err) = self.draw().await {
                        return SessionEnd::TransportFailed(format!("{err:#}"));
                    }
                    continue;
                }
                Inbound::Failed(reason) => return SessionEnd::TransportFailed(reason),
            };

            for event in events {
                match self.handle(event).await {
                    Ok(Some(end)) => return end,
                    Ok(None) => {}
                    Err(err) => return SessionEnd::TransportFailed(format!("{err:#}")),
                }
            }
        }
    }

    async fn handle(&mut self, event: KeyEvent) -> Result<Option<SessionEnd>> {
        let transition = apply(&mut self.state, event, &self.snapshot);
        if transition.quit {
            return Ok(Some(if event == KeyEvent::EndOfInput {
                SessionEnd::EndOfInput
            } else {
                SessionEnd::Interrupted
            }));
        }

        for command in transition.commands {
            if let Some(end) = self.execute(command) {
                return Ok(Some(end));
            }
        }

        if transition.redraw {
            self.draw().await?;
        }
        Ok(None)
    }

    /// Run one store command. Only a failed registration ends the session.
    fn execute(&mut self, command: StoreCommand) -> Option<SessionEnd> {
        let user = self.state.identity.as_str();
        debug!(user = %user, ?command, "executing store command");
        let result = match command {
            StoreCommand::AddTask(text) => self.ctx.tasks.add(user, &text).map(drop),
            StoreCommand::UpdateTask { id, text } => {
                self.ctx.tasks.update(user, id, &text).map(drop)
            }
            StoreCommand::ToggleTask(id) => self.ctx.tasks.toggle_complete(user, id).map(drop),
            StoreCommand::DeleteTask(id) => self.ctx.tasks.delete(user, id),
            StoreCommand::RegisterCredential { username, password } => {
                return self
                    .ctx
                    .credentials
                    .register(&username, &password)
                    .err()
                    .map(|err| {
                        error!(user = %username, error = %err, "registration failed");
                        SessionEnd::RegistrationFailed(err.to_string())
                    });
            }
        };

        match result {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(user = %user, error = %err, "dropping command for stale task");
            }
            Err(err) => {
                warn!(user = %user, error = %err, "store command failed");
                self.state.status = Some(format!("Could not save change: {err}"));
            }
        }
        None
    }

    fn refresh_snapshot(&mut self) {
        match self.ctx.tasks.list(&self.state.identity) {
            Ok(tasks) => self.snapshot = tasks,
            Err(err) => {
                warn!(user = %self.state.identity, error = %err, "task list failed");
                self.state.status = Some(format!("Could not load tasks: {err}"));
            }
        }
        self.state.clamp_selection(self.snapshot.len());
    }

    async fn draw(&mut self) -> Result<()> {
        if !matches!(self.state.mode, Mode::Registering(_)) {
            self.refresh_snapshot();
        }
        self.send(render(&self.state, &self.snapshot)).await
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound
            .send(Outbound::Data(bytes))
            .await
            .map_err(|_| anyhow!("output channel closed"))
            .context("write frame")
    }

    /// Best effort: the transport may already be gone.
    async fn teardown(&self, end: &SessionEnd) {
        let explanation = end.explanation();
        let mut lines: Vec<&str> = explanation.iter().map(String::as_str).collect();
        lines.push(FAREWELL);
        if self.send(leave_session(&lines)).await.is_err() {
            debug!(user = %self.state.identity, "transport gone before teardown");
            return;
        }
        let _ = self.outbound.send(Outbound::Exit(end.exit_status())).await;
    }
}
