// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! kirobridge CLI - credential pool and backend client from the command
//! line.
//!
//! # Examples
//!
//! ```bash
//! # Show pool status
//! kirobridge status
//!
//! # Query quota for the next credential in rotation
//! kirobridge usage
//!
//! # Query quota for every credential
//! kirobridge usage --all
//!
//! # One-shot chat completion
//! kirobridge chat "Explain borrowing in one paragraph"
//!
//! # Mint a new credential through the browser OAuth flow
//! kirobridge login --idp google
//!
//! # Refresh all expired credentials
//! kirobridge refresh
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kirobridge_core::Settings;
use kirobridge_pool::{CredentialPool, FileCredentialStore};
use kirobridge_wire::PortalClient;

use commands::AppContext;

// ============================================================================
// CLI Definition
// ============================================================================

/// kirobridge CLI - credential pool and backend clients.
#[derive(Parser)]
#[command(name = "kirobridge")]
#[command(about = "Credential pool and protocol clients for the Kiro backend")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Token directory override.
    #[arg(long, global = true)]
    pub tokens_dir: Option<PathBuf>,

    /// JSON output for scripting.
    #[arg(long, global = true)]
    pub json: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show pool status.
    #[command(visible_alias = "s")]
    Status,

    /// Query quota usage through the pool.
    #[command(visible_alias = "u")]
    Usage(commands::usage::UsageArgs),

    /// Generate an assistant response.
    #[command(visible_alias = "c")]
    Chat(commands::chat::ChatArgs),

    /// Mint a new credential through the browser OAuth flow.
    Login(commands::login::LoginArgs),

    /// Refresh all expired credentials.
    Refresh,
}

// ============================================================================
// Entry Point
// ============================================================================

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = Settings::default();
    settings.validate()?;
    let store = Arc::new(match &cli.tokens_dir {
        Some(dir) => FileCredentialStore::new(dir.clone()),
        None => FileCredentialStore::default_location(),
    });
    let portal = Arc::new(PortalClient::from_settings(&settings));
    let pool = Arc::new(CredentialPool::new(
        store.clone(),
        portal.clone(),
        settings.ban_policy.clone(),
    ));
    pool.load().await?;

    let ctx = AppContext {
        settings,
        store,
        portal,
        pool,
        json: cli.json,
    };

    match cli.command {
        Commands::Status => commands::status::run(&ctx).await,
        Commands::Usage(args) => commands::usage::run(&ctx, &args).await,
        Commands::Chat(args) => commands::chat::run(&ctx, &args).await,
        Commands::Login(args) => commands::login::run(&ctx, &args).await,
        Commands::Refresh => commands::refresh::run(&ctx).await,
    }
}
