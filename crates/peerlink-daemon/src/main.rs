//! # peerlink
//!
//! Signaling server binary. `serve` (the default) runs the relay;
//! `account` and `device` provision the registry it authenticates against.

#![deny(unsafe_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use peerlink_core::{DeviceId, DeviceType};
use peerlink_logging::LogFormat;
use peerlink_server::{ServerConfig, SignalingServer};
use peerlink_settings::{Environment, PeerlinkSettings};
use peerlink_store::{AccountRepo, Database, DeviceRepo, SqliteDeviceRegistry};

/// WebRTC signaling relay.
#[derive(Parser, Debug)]
#[command(name = "peerlink", about = "WebRTC signaling relay", version)]
struct Cli {
    /// Settings file (default `~/.peerlink/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the `SQLite` device registry (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling server.
    Serve(ServeArgs),
    /// Manage accounts.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Manage devices.
    #[command(subcommand)]
    Device(DeviceCommand),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Do not install the Prometheus recorder or serve `/metrics`.
    #[arg(long)]
    no_metrics: bool,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Create an account.
    Add {
        /// Contact address, unique per account.
        email: String,
    },
    /// List accounts.
    List,
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Register a device and print its token.
    Add {
        /// Owning account's email.
        #[arg(long)]
        email: String,
        /// Display name.
        #[arg(long)]
        name: String,
        /// `desktop` or `mobile`.
        #[arg(long = "type", default_value = "desktop")]
        device_type: DeviceType,
    },
    /// List an account's devices.
    List {
        /// Owning account's email.
        #[arg(long)]
        email: String,
    },
    /// Delete a device; its token stops working immediately.
    Remove {
        /// Device to delete.
        device_id: DeviceId,
    },
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_database(settings: &PeerlinkSettings) -> Result<Database> {
    let path = settings.database.resolved_path();
    ensure_parent_dir(&path)?;
    Database::open(&path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn log_format(environment: Environment) -> LogFormat {
    match environment {
        Environment::Development => LogFormat::Pretty,
        Environment::Production => LogFormat::Json,
    }
}

fn run_account(cmd: AccountCommand, db: &Database) -> Result<String> {
    let accounts = AccountRepo::new(db.clone());
    let mut out = String::new();
    match cmd {
        AccountCommand::Add { email } => {
            let account = accounts
                .create(&email)
                .with_context(|| format!("Failed to create account {email}"))?;
            let _ = writeln!(out, "{}\t{}", account.id, account.email);
        }
        AccountCommand::List => {
            for account in accounts.list()? {
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}",
                    account.id,
                    account.email,
                    account.created_at.to_rfc3339()
                );
            }
        }
    }
    Ok(out)
}

fn run_device(cmd: DeviceCommand, db: &Database) -> Result<String> {
    let accounts = AccountRepo::new(db.clone());
    let devices = DeviceRepo::new(db.clone());
    let account_for = |email: &str| -> Result<_> {
        match accounts.get_by_email(email)? {
            Some(account) => Ok(account),
            None => bail!("No account with email {email}"),
        }
    };

    let mut out = String::new();
    match cmd {
        DeviceCommand::Add {
            email,
            name,
            device_type,
        } => {
            let account = account_for(&email)?;
            let device = devices.create(account.id, &name, device_type)?;
            let _ = writeln!(out, "device_id={}", device.id);
            let _ = writeln!(out, "device_token={}", device.token);
        }
        DeviceCommand::List { email } => {
            let account = account_for(&email)?;
            for device in devices.list_for_account(account.id)? {
                let last_seen = device
                    .last_seen_at
                    .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    device.id, device.name, device.device_type, last_seen
                );
            }
        }
        DeviceCommand::Remove { device_id } => {
            if !devices.delete(device_id)? {
                bail!("No device {device_id}");
            }
            let _ = writeln!(out, "removed {device_id}");
        }
    }
    Ok(out)
}

async fn serve(mut settings: PeerlinkSettings, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings.validate().context("Invalid settings")?;

    let db = open_database(&settings)?;
    info!(path = %db.path().display(), "device registry opened");
    let registry = Arc::new(SqliteDeviceRegistry::new(db));

    let mut server = SignalingServer::new(ServerConfig::from(&settings.server), registry);
    if !args.no_metrics {
        let handle = peerlink_server::metrics::install_recorder()?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to start signaling server")?;
    info!(%addr, "peerlink ready");

    shutdown_signal().await;

    let _ = server.shutdown().await;
    if !server
        .coordinator()
        .graceful_shutdown(vec![handle], None)
        .await
    {
        warn!("listener did not stop in time");
    }
    info!("peerlink stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                let _ = sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => peerlink_settings::load_settings_from_path(path),
        None => peerlink_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    if let Some(path) = cli.db_path {
        settings.database.path = Some(path);
    }

    peerlink_logging::init_logging(
        &settings.logging.level,
        log_format(settings.logging.environment),
    )?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(settings, args).await,
        Command::Account(cmd) => {
            print!("{}", run_account(cmd, &open_database(&settings)?)?);
            Ok(())
        }
        Command::Device(cmd) => {
            print!("{}", run_device(cmd, &open_database(&settings)?)?);
            Ok(())
        }
    }
}
