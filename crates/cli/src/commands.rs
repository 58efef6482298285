//! CLI commands

use anyhow::{Context, Result};
use burrow_core::tracing::metrics;
use burrow_netio::{
    AdmissionToken, Bootstrapped, ConnectionAdmission, Link, NetConfig, PeerNodeId,
    ProtocolFeature, Role, StreamUtils, TransportBootstrap,
};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config;
use crate::logging;

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for mesh peers, passing everything else to the local service on the same port
    Listen {
        /// Address to listen on, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: String,

        /// Share the port with a service already bound to it
        #[arg(long)]
        reuse_port: bool,
    },

    /// Dial a mesh peer and exchange lines from stdin over the link
    Connect {
        /// Peer address, e.g. node.example:8080
        #[arg(long)]
        addr: String,
    },

    /// Run an admission-gated link loop on behalf of a peer node
    Admit {
        /// `connect` or `listen`
        #[arg(long)]
        role: String,

        /// Address to dial or listen on
        #[arg(long)]
        addr: String,

        /// Identifier of the peer node the links belong to
        #[arg(long)]
        peer: String,
    },

    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path (defaults to BURROW_STATE_DIR/burrow.json)
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show,
}

impl Commands {
    pub const fn component(&self) -> &'static str {
        match self {
            Self::Listen { .. } => "listen",
            Self::Connect { .. } => "connect",
            Self::Admit { .. } => "admit",
            Self::Config { .. } => "cli",
        }
    }

    pub async fn execute(self, data_dir: Option<PathBuf>, config_path: Option<&Path>) -> Result<()> {
        match self {
            Self::Listen { addr, reuse_port } => {
                let config = config::load_net_config(config_path)?;
                listen(config, &addr, reuse_port).await
            }
            Self::Connect { addr } => {
                let config = config::load_net_config(config_path)?;
                connect(config, &addr).await
            }
            Self::Admit { role, addr, peer } => {
                let role: Role = role.parse()?;
                let config = config::load_net_config(config_path)?;
                admit(config, role, &addr, PeerNodeId::new(peer)).await
            }
            Self::Config { command } => command.execute(data_dir, config_path),
        }
    }
}

impl ConfigCommands {
    fn execute(self, data_dir: Option<PathBuf>, config_path: Option<&Path>) -> Result<()> {
        match self {
            Self::Generate { output } => {
                let output =
                    output.unwrap_or_else(|| logging::state_dir(data_dir).join("burrow.json"));
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                config::generate_default_config(&output)?;
                info!("Generated configuration at {}", output.display());
            }
            Self::Show => {
                let config = config::load_net_config(config_path)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
        Ok(())
    }
}

async fn listen(config: NetConfig, addr: &str, reuse_port: bool) -> Result<()> {
    let bootstrap = TransportBootstrap::new(config);
    let running = bootstrap
        .bootstrap(Role::Listen, addr, reuse_port, echo_control_link)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;

    info!("Listening on {}", running.local_addr());
    shutdown_on_ctrl_c(&running).await
}

async fn connect(config: NetConfig, addr: &str) -> Result<()> {
    let marker = config.protocol_feature();
    let bootstrap = TransportBootstrap::new(config);
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let running = bootstrap
        .bootstrap(Role::Connect, addr, false, move |link| {
            let marker = marker.clone();
            let done_tx = done_tx.clone();
            async move {
                if let Err(e) = stdin_session(link, &marker).await {
                    warn!("Session ended with error: {e}");
                }
                let _ = done_tx.send(()).await;
            }
        })
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;

    info!("Connected to {addr} from {}", running.local_addr());
    done_rx.recv().await;
    Ok(())
}

async fn admit(config: NetConfig, role: Role, addr: &str, peer: PeerNodeId) -> Result<()> {
    let admission = ConnectionAdmission::new(config);
    let echoed = Arc::new(AtomicU64::new(0));

    match role {
        Role::Listen => {
            let running = admission
                .admit_loop(role, addr, peer, echo_admitted_link, echoed.clone())
                .await
                .with_context(|| format!("Failed to listen on {addr}"))?;
            info!("Admitting links on {}", running.local_addr());
            shutdown_on_ctrl_c(&running).await?;
        }
        Role::Connect => {
            let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
            admission
                .admit_loop(
                    role,
                    addr,
                    peer,
                    move |link, peer, token, echoed| {
                        let done_tx = done_tx.clone();
                        async move {
                            echo_admitted_link(link, peer, token, echoed).await;
                            let _ = done_tx.send(()).await;
                        }
                    },
                    echoed.clone(),
                )
                .await
                .with_context(|| format!("Failed to connect to {addr}"))?;
            done_rx.recv().await;
        }
    }

    info!("Echoed {} bytes in total", echoed.load(Ordering::Relaxed));
    Ok(())
}

async fn shutdown_on_ctrl_c(running: &Bootstrapped) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    running.abort();
    metrics::log_all_metrics();
    Ok(())
}

/// Echo everything after the marker back to the peer
async fn echo_control_link(link: Link) {
    let peer_addr = link.peer_addr().ok();
    let (marker, stream) = link.into_parts();
    debug!(?peer_addr, "Control link opened with {} marker bytes", marker.len());

    let (mut reader, mut writer) = stream.into_split();
    match StreamUtils::copy(&mut reader, &mut writer).await {
        Ok(bytes) => info!(?peer_addr, "Control link closed after {bytes} bytes"),
        Err(e) => warn!(?peer_addr, "Control link failed: {e}"),
    }
}

/// Echo an admitted link, holding its token until the peer hangs up
async fn echo_admitted_link(
    link: Link,
    peer: PeerNodeId,
    token: Option<AdmissionToken>,
    echoed: Arc<AtomicU64>,
) {
    let (mut reader, mut writer) = tokio::io::split(link);
    match StreamUtils::copy(&mut reader, &mut writer).await {
        Ok(bytes) => {
            echoed.fetch_add(bytes, Ordering::Relaxed);
            info!(%peer, "Admitted link closed after {bytes} bytes");
        }
        Err(e) => warn!(%peer, "Admitted link failed: {e}"),
    }
    if let Some(token) = token {
        token.release();
    }
}

/// Announce ourselves with the marker, then pipe stdin to the link and the link to stdout
async fn stdin_session(link: Link, marker: &ProtocolFeature) -> std::io::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(link);
    StreamUtils::write_all(&mut writer, marker.as_bytes()).await?;

    let to_stdout = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        StreamUtils::copy(&mut reader, &mut stdout).await
    });

    let mut stdin = tokio::io::stdin();
    StreamUtils::copy(&mut stdin, &mut writer).await?;
    writer.shutdown().await?;

    to_stdout.await.map_err(std::io::Error::other)??;
    Ok(())
}
