//! todossh server: serves interactive todo-list sessions over SSH.

mod handler;
mod host_key;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use russh::MethodSet;
use russh::server::{Config, Server as _};
use todossh::exit_codes;
use todossh::io::config::{ServerConfig, load_config, write_config};
use tracing::{error, info};

use crate::handler::TodoServer;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "todossh-server", version)]
#[command(about = "SSH server for interactive todo lists")]
struct Args {
    /// Path to the TOML config file (defaults apply if missing)
    #[arg(long, default_value = "todossh.toml")]
    config: PathBuf,

    /// Address to bind the server to
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding users.json and tasks/
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host key file (generated if missing)
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Write the effective config to --config and exit
    #[arg(long)]
    write_config: bool,
}

impl Args {
    /// Layer command-line overrides over `cfg` and re-validate.
    fn apply(&self, mut cfg: ServerConfig) -> Result<ServerConfig> {
        if let Some(bind) = &self.bind {
            cfg.bind = bind.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(data_dir) = &self.data_dir {
            cfg.data_dir = data_dir.clone();
        }
        if let Some(host_key) = &self.host_key {
            cfg.host_key_path = host_key.clone();
        }
        cfg.validate().context("validate command-line overrides")?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() {
    todossh::logging::init("todossh=info,todossh_server=info");
    if let Err(err) = run(Args::parse()).await {
        error!(error = %format!("{err:#}"), "server failed");
        eprintln!("{err:#}");
        std::process::exit(exit_codes::ERROR);
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = args.apply(load_config(&args.config)?)?;
    if args.write_config {
        write_config(&args.config, &cfg)?;
        info!(path = %args.config.display(), "config written");
        return Ok(());
    }

    let state = AppState::open(&cfg)?;
    let key = host_key::load_or_generate(&cfg.host_key_path)?;
    let ssh_config = Arc::new(Config {
        methods: MethodSet::PASSWORD,
        auth_rejection_time: cfg.auth_rejection_time(),
        keys: vec![key],
        ..Default::default()
    });

    let addr = cfg.listen_addr();
    info!(addr = %addr, data_dir = %cfg.data_dir.display(), "listening");
    let mut server = TodoServer::new(state);
    tokio::select! {
        result = server.run_on_address(ssh_config, addr.as_str()) => {
            result.with_context(|| format!("serve on {addr}"))?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("wait for ctrl-c")?;
            info!("shutdown requested");
        }
    }
    Ok(())
}
