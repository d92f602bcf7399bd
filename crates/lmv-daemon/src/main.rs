//! lmv-daemon - Local Memory Vault control plane.
//!
//! Subcommands:
//!
//! - `serve` (default): open the vault, verify it, and serve the HTTP
//!   surface until SIGINT/SIGTERM.
//! - `rotate`: re-encrypt the vault under `LMV_NEW_PASSPHRASE` with atomic
//!   swap and rollback.
//! - `verify`: run the full integrity verification and report the entry
//!   count.
//!
//! Configuration comes from flags and the `LMV_*` environment (see
//! `config`); the passphrase is required and never logged.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lmv_core::rotation::rotate_passphrase;
use lmv_core::VaultEngine;
use lmv_daemon::config::{self, DaemonConfig};
use lmv_daemon::http::{router, AppState};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Local Memory Vault daemon.
#[derive(Parser, Debug)]
#[command(name = "lmv-daemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP surface (the default).
    Serve(ServeArgs),

    /// Re-encrypt the vault under LMV_NEW_PASSPHRASE.
    Rotate(DataDirArgs),

    /// Verify the snapshot, hash chain, and replay; print the entry count.
    Verify(DataDirArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Bind address (default 127.0.0.1).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides LMV_PORT / PORT, default 8787).
    #[arg(long)]
    port: Option<u16>,

    /// Data directory (overrides LMV_DATA_DIR / DATA_DIR, default ./data).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DataDirArgs {
    /// Data directory (overrides LMV_DATA_DIR / DATA_DIR, default ./data).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(args),
        Command::Rotate(args) => rotate(&args),
        Command::Verify(args) => verify(&args),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = DaemonConfig::resolve(args.bind, args.port, args.data_dir)?;

    let engine = VaultEngine::open(&config.data_dir, &config.passphrase)
        .context("failed to open vault")?;
    let entries = engine
        .verify_ledger()
        .context("vault failed integrity verification at startup")?;
    info!(
        data_dir = %config.data_dir.display(),
        entries,
        write_gate = config.write_token.is_some(),
        "vault opened and verified"
    );

    let state = AppState::new(Arc::new(engine), config.write_token.clone());
    let addr = SocketAddr::new(config.bind, config.port);

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "HTTP surface listening");

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")
    })
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}

fn rotate(args: &DataDirArgs) -> Result<()> {
    let (old, new) = config::rotation_passphrases()?;
    let data_dir = config::resolve_data_dir(args.data_dir.clone());

    if *old == *new {
        warn!("LMV_NEW_PASSPHRASE equals LMV_PASSPHRASE, nothing to rotate");
        return Ok(());
    }

    rotate_passphrase(&data_dir, &old, &new).context("rotation aborted and rolled back")?;
    info!(data_dir = %data_dir.display(), "rotation complete");
    Ok(())
}

fn verify(args: &DataDirArgs) -> Result<()> {
    let passphrase = config::required_passphrase("LMV_PASSPHRASE")?;
    let data_dir = config::resolve_data_dir(args.data_dir.clone());

    let engine = VaultEngine::open(&data_dir, &passphrase).context("failed to open vault")?;
    let entries = engine.verify_ledger().context("verification failed")?;
    let state = engine.current_state().context("state assembly failed")?;
    println!(
        "ok: {entries} journal entries, memory version {}, snapshot cursor {}",
        state.memory.version, state.snapshot_cursor
    );
    Ok(())
}
