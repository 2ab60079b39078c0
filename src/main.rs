#![forbid(unsafe_code)]

//! `provider-agent`: edge storage agent binary.
//!
//! Loads configuration, resolves the local IPFS peer id, performs the
//! one-time provider claim when configured, then keeps a session to the
//! coordinator until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use provider_agent::config::{ClaimConfig, GlobalConfig};
use provider_agent::session::manager::SessionManager;
use provider_agent::store::kubo::KuboStore;
use provider_agent::store::ContentStore;
use provider_agent::{claim, credentials};
use provider_agent::{AppError, Result};

/// Budget for reading the local peer id at startup.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "provider-agent", about = "Edge storage provider agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the coordinator URL (`ws://`, `wss://` or `tcp://`).
    #[arg(long)]
    coordinator_url: Option<String>,

    /// Claim the peer id at startup even if the config has no `[claim]` table.
    #[arg(long)]
    claim: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("provider-agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
        .inspect_err(|err| error!(%err, "fatal startup error"))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env()?;
    if let Some(url) = args.coordinator_url {
        config.coordinator_url = url;
    }
    if args.claim && config.claim.is_none() {
        config.claim = Some(ClaimConfig::default());
    }
    config.validate()?;
    let config = Arc::new(config);
    info!(coordinator = %config.coordinator_url, "configuration loaded");

    // ── Resolve local identity (fatal on failure) ───────
    let store = Arc::new(KuboStore::new(config.store.clone()));
    let peer_id = store.peer_id(IDENTITY_TIMEOUT).await?;
    info!(peer_id = %peer_id, "local peer id resolved");

    // ── One-time claim (fatal on failure) ───────────────
    if let Some(claim_config) = &config.claim {
        let token_path = claim_config.token_path();
        let token = credentials::load_token(&token_path).await?;
        claim::claim_peer_id(claim_config, &token, &peer_id).await?;
        if claim_config.delete_token_after_claim {
            credentials::remove_token_file(&token_path);
        }
    } else {
        info!("no claim configured; running in bootstrap mode");
    }

    // ── Session loop ────────────────────────────────────
    let manager = SessionManager::new(Arc::clone(&config), peer_id, store);
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    manager.run(shutdown).await;
    info!("provider-agent shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
