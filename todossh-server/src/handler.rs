//! SSH transport: bridges `russh` channels to session queues.
//!
//! Each accepted connection gets a [`ConnectionHandler`]. A `shell` request
//! spawns two tasks: the session loop, and a forwarder that writes the
//! session's output to the channel and finishes with the exit status.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use russh::server::{self, Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use todossh::core::types::Viewport;
use todossh::io::credential_store::CredentialStore;
use todossh::io::error::StoreError;
use todossh::session::{CHANNEL_CAPACITY, Inbound, Outbound, run_session};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Accepts connections and builds one handler per client.
#[derive(Clone)]
pub struct TodoServer {
    state: AppState,
}

impl TodoServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl server::Server for TodoServer {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> ConnectionHandler {
        debug!(?peer, "client connected");
        ConnectionHandler::new(self.state.clone(), peer)
    }
}

/// Per-channel transport state.
#[derive(Default)]
struct ChannelSlot {
    viewport: Viewport,
    /// Set once the shell has started. Unbounded so handler callbacks never
    /// wait on the session while russh waits on them.
    input: Option<mpsc::UnboundedSender<Inbound>>,
}

/// Result of checking a password attempt against the credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthDecision {
    /// Known user with a matching password.
    Accept,
    /// No credential yet; the session asks for a new password.
    Register,
    Reject(&'static str),
}

impl AuthDecision {
    fn check(credentials: &dyn CredentialStore, user: &str, password: &str) -> Self {
        match credentials.lookup(user) {
            Ok(Some(record)) if record.verify(password) => Self::Accept,
            Ok(Some(_)) => Self::Reject("password rejected"),
            Ok(None) => Self::Register,
            Err(StoreError::InvalidUser(_)) => Self::Reject("invalid username"),
            Err(err) => {
                warn!(user, error = %err, "credential lookup failed");
                Self::Reject("credential lookup failed")
            }
        }
    }
}

/// Why a shell request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellRefusal {
    NotAuthenticated,
    UnknownChannel,
    AlreadyRunning,
}

/// Claim `slot` for a new session: returns the user, the starting viewport
/// and the session's input queue.
fn claim_shell(
    user: Option<&str>,
    slot: Option<&mut ChannelSlot>,
) -> Result<(String, Viewport, mpsc::UnboundedReceiver<Inbound>), ShellRefusal> {
    let user = user.ok_or(ShellRefusal::NotAuthenticated)?;
    let slot = slot.ok_or(ShellRefusal::UnknownChannel)?;
    if slot.input.is_some() {
        return Err(ShellRefusal::AlreadyRunning);
    }
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    slot.input = Some(in_tx);
    Ok((user.to_string(), slot.viewport, in_rx))
}

pub struct ConnectionHandler {
    state: AppState,
    peer: Option<SocketAddr>,
    user: Option<String>,
    channels: HashMap<ChannelId, ChannelSlot>,
}

impl ConnectionHandler {
    fn new(state: AppState, peer: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer,
            user: None,
            channels: HashMap::new(),
        }
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
        }
    }

    fn forward(&self, channel: ChannelId, message: Inbound) {
        let Some(input) = self.channels.get(&channel).and_then(|slot| slot.input.as_ref()) else {
            return;
        };
        if input.send(message).is_err() {
            debug!(?channel, "session already ended");
        }
    }

    fn start_shell(&mut self, channel: ChannelId, handle: Handle) -> Result<(), ShellRefusal> {
        let (user, viewport, in_rx) =
            claim_shell(self.user.as_deref(), self.channels.get_mut(&channel))?;
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(forward_output(handle, channel, out_rx));
        let ctx = self.state.sessions.clone();
        tokio::spawn(async move {
            run_session(&ctx, &user, viewport, in_rx, out_tx).await;
        });
        Ok(())
    }
}

/// Write session output to the channel in order, then close it.
async fn forward_output(handle: Handle, channel: ChannelId, mut output: mpsc::Receiver<Outbound>) {
    while let Some(message) = output.recv().await {
        match message {
            Outbound::Data(bytes) => {
                if handle.data(channel, CryptoVec::from_slice(&bytes)).await.is_err() {
                    debug!(?channel, "channel write failed");
                    return;
                }
            }
            Outbound::Exit(status) => {
                let _ = handle.exit_status_request(channel, status).await;
                break;
            }
        }
    }
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

#[async_trait]
impl server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        // bcrypt is slow on purpose; keep it off the connection's task.
        let credentials = self.state.sessions.credentials.clone();
        let (name, attempt) = (user.to_string(), password.to_string());
        let decision = tokio::task::spawn_blocking(move || {
            AuthDecision::check(credentials.as_ref(), &name, &attempt)
        })
        .await?;
        if let AuthDecision::Reject(reason) = decision {
            info!(user, peer = ?self.peer, reason, "authentication rejected");
            return Ok(Self::reject());
        }
        info!(user, peer = ?self.peer, ?decision, "authenticated");
        self.user = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), ChannelSlot::default());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let viewport = Viewport::from_client(col_width, row_height);
        debug!(?channel, term, ?viewport, "pty requested");
        if let Some(slot) = self.channels.get_mut(&channel) {
            slot.viewport = viewport;
        }
        session.channel_success(channel);
        self.forward(channel, Inbound::Resize(viewport));
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let viewport = Viewport::from_client(col_width, row_height);
        if let Some(slot) = self.channels.get_mut(&channel) {
            slot.viewport = viewport;
        }
        self.forward(channel, Inbound::Resize(viewport));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.start_shell(channel, session.handle()) {
            Ok(()) => {
                session.channel_success(channel);
            }
            Err(refusal) => {
                warn!(?channel, ?refusal, "shell request refused");
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(?channel, command = %String::from_utf8_lossy(data), "exec refused");
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(?channel, name, "subsystem refused");
        session.channel_failure(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, Inbound::Data(data.to_vec()));
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, Inbound::Eof);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, Inbound::Eof);
        self.channels.remove(&channel);
        Ok(())
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        for (channel, slot) in self.channels.drain() {
            if let Some(input) = slot.input {
                debug!(?channel, peer = ?self.peer, "connection dropped with open channel");
                let _ = input.send(Inbound::Failed("connection closed".to_string()));
            }
        }
    }
}
