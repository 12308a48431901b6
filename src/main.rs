//! Zapdesk CLI entry point.
//!
//! Provides `start`, `link`, and `check-config` subcommands for running the
//! WhatsApp front desk, linking a phone number to an account, or validating
//! the configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use zapdesk::actions::ActionRegistry;
use zapdesk::config::{self, Config, NluProviderKind};
use zapdesk::conversation::engine::ConversationEngine;
use zapdesk::conversation::router::ConversationRouter;
use zapdesk::store::{AccountDirectory, AccountId, Database, SessionStore, SqliteAccountDirectory, SqliteSessionStore};
use zapdesk::whatsapp::auth::{AuthState, AuthStore, FileAuthStore};
use zapdesk::whatsapp::connection::{ConnectionManager, ReconnectPolicy, RunExit};
use zapdesk::whatsapp::dispatcher::OutboundDispatcher;
use zapdesk::whatsapp::transport::HttpBridgeTransport;
use zapdesk::{logging, nlu};

/// Zapdesk: WhatsApp front desk for clients, projects and scheduling.
#[derive(Parser)]
#[command(name = "zapdesk", version, about)]
struct Cli {
    /// Configuration directory (defaults to `~/.zapdesk`).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Connect to WhatsApp and answer messages until Ctrl-C.
    Start,
    /// Link a phone number to a dashboard account.
    Link {
        /// Phone number, any format (e.g. "(11) 98765-4321").
        phone: String,
        /// Account identifier from the dashboard.
        account_id: String,
    },
    /// Parse and validate the configuration, then print a summary.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => config::config_dir()?,
    };

    match cli.command {
        Command::Start => handle_start(&config_dir).await,
        Command::Link { phone, account_id } => handle_link(&config_dir, &phone, account_id).await,
        Command::CheckConfig => handle_check_config(&config_dir),
    }
}

fn load(config_dir: &Path) -> anyhow::Result<Config> {
    let path = config_dir.join("config.toml");
    config::load_config(&path).with_context(|| format!("failed to load {}", path.display()))
}

/// Run the front desk until Ctrl-C, logout, or reconnect exhaustion.
async fn handle_start(config_dir: &Path) -> anyhow::Result<()> {
    if let Err(e) = dotenvy::from_path(config_dir.join(".env")) {
        if !e.not_found() {
            return Err(e).context("failed to read .env");
        }
    }

    let _logging_guard = logging::init_service(&config_dir.join("logs"))?;
    let config = load(config_dir)?;
    info!(version = env!("CARGO_PKG_VERSION"), "zapdesk starting");

    let db_path = config.database_path(config_dir);
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(db.pool().clone()));
    let accounts: Arc<dyn AccountDirectory> = Arc::new(SqliteAccountDirectory::new(db.pool().clone()));
    let nlu = nlu::build_nlu(&config.nlu).context("failed to build NLU backend")?;
    let actions = Arc::new(ActionRegistry::with_defaults(db.pool().clone()));

    let transport = Arc::new(HttpBridgeTransport::new(config.whatsapp.bridge_url.as_str()));
    let auth_store: Arc<dyn AuthStore> = Arc::new(FileAuthStore::new(config.auth_path(config_dir)));
    let (inbound_tx, inbound_rx) = mpsc::channel(config.conversation.inbound_buffer);
    let connection = Arc::new(ConnectionManager::new(
        transport,
        Arc::clone(&auth_store),
        inbound_tx,
        ReconnectPolicy::from_config(&config.whatsapp),
    ));

    let replier = Arc::new(OutboundDispatcher::new(Arc::clone(&connection)));
    let engine = Arc::new(
        ConversationEngine::new(sessions, accounts, nlu, actions, replier)
            .with_nlu_timeout(config.nlu.timeout()),
    );
    let router = Arc::new(
        ConversationRouter::new(engine, config.conversation.session_buffer)
            .with_idle_timeout(config.conversation.worker_idle()),
    );

    let router_task = tokio::spawn(Arc::clone(&router).run(inbound_rx));
    let mut connection_task = tokio::spawn(Arc::clone(&connection).run());

    let exit = tokio::select! {
        joined = &mut connection_task => match joined {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(error = %e, "connection task failed");
                Some(RunExit::Shutdown)
            }
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            None
        }
    };

    connection.shutdown().await;
    if exit.is_none() {
        if let Err(e) = connection_task.await {
            warn!(error = %e, "connection task ended abnormally");
        }
    }
    router.shutdown_all().await;
    router_task.abort();

    match exit {
        Some(RunExit::LoggedOut) => {
            auth_store
                .save(&AuthState::default())
                .await
                .context("failed to clear revoked credentials")?;
            eprintln!("WhatsApp session was logged out. Run `zapdesk start` again to pair a new device.");
        }
        Some(RunExit::RetriesExhausted) => {
            anyhow::bail!("gave up reconnecting to WhatsApp bridge at {}", config.whatsapp.bridge_url);
        }
        Some(RunExit::Shutdown) | None => {}
    }

    info!("zapdesk stopped");
    Ok(())
}

/// Link a phone number to an account.
async fn handle_link(config_dir: &Path, phone: &str, account_id: String) -> anyhow::Result<()> {
    logging::init_cli();
    let config = load(config_dir)?;
    let db_path = config.database_path(config_dir);
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let directory = SqliteAccountDirectory::new(db.pool().clone());
    let account = AccountId(account_id);
    let canonical = directory
        .link_phone(phone, &account)
        .await
        .with_context(|| format!("failed to link {phone}"))?;
    println!("Linked {canonical} to account {account}.");
    Ok(())
}

/// Validate the configuration and print a summary.
fn handle_check_config(config_dir: &Path) -> anyhow::Result<()> {
    logging::init_cli();
    let config = load(config_dir)?;

    println!("Config directory: {}", config_dir.display());
    println!("Bridge URL:       {}", config.whatsapp.bridge_url);
    println!("Auth state:       {}", config.auth_path(config_dir).display());
    println!("Database:         {}", config.database_path(config_dir).display());
    match config.whatsapp.reconnect_limit() {
        Some(max) => println!(
            "Reconnect:        every {}s, at most {max} attempts",
            config.whatsapp.reconnect_delay_secs
        ),
        None => println!(
            "Reconnect:        every {}s, unbounded",
            config.whatsapp.reconnect_delay_secs
        ),
    }
    match config.nlu.provider {
        NluProviderKind::Rules => println!("NLU:              rules"),
        NluProviderKind::OpenAi => {
            let key_state = if std::env::var_os(&config.nlu.api_key_env).is_some() {
                "set"
            } else {
                "NOT SET"
            };
            println!(
                "NLU:              openai ({} at {}, {} {key_state})",
                config.nlu.model, config.nlu.base_url, config.nlu.api_key_env
            );
        }
    }
    println!("Config OK");
    Ok(())
}
