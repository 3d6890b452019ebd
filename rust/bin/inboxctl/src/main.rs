//! `inboxctl`: drive the notification inbox from a terminal.
//!
//! Runs the REST half of the sync engine (snapshot, unread count,
//! optimistic mutations, preferences) against a live storefront server.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::Ctx;

/// Storefront notification inbox CLI.
#[derive(Parser, Debug)]
#[command(name = "inboxctl", about = "Storefront notification inbox CLI")]
struct Cli {
    /// Path to the config file (default: ~/.storefront/inbox.toml).
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Override `api.base_url` from the config file.
    #[arg(long = "server", global = true)]
    server: Option<String>,

    /// Bearer token.
    #[arg(long = "token", env = "STOREFRONT_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Output format: table or json.
    #[arg(long = "output", short = 'o', global = true, default_value = "table")]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List one page of notifications.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Page size (default: api.page_size).
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show the server's unread count.
    Unread,

    /// Mark one notification as read.
    Read { id: String },

    /// Mark every notification as read.
    #[command(name = "read-all")]
    ReadAll,

    /// Delete one notification.
    Delete { id: String },

    /// Delete every notification.
    Clear {
        /// Skip confirmation.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },

    /// Show notification preferences.
    Prefs,

    /// Update notification preferences.
    #[command(name = "prefs-set")]
    PrefsSet {
        /// Category toggle, e.g. `promotion=false`. Repeatable.
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Delivery method toggle, e.g. `email=false`. Repeatable.
        #[arg(long = "delivery")]
        delivery: Vec<String>,
        /// immediate, hourly, daily or weekly.
        #[arg(long)]
        frequency: Option<String>,
        /// Quiet hours as `HH:MM-HH:MM`, or `off`.
        #[arg(long = "quiet-hours")]
        quiet_hours: Option<String>,
    },

    /// Show version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("inboxctl v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(config::default_path);
    let sync_config = config::load(&config_path, cli.server.as_deref())?;
    tracing::debug!(
        config = %config_path.display(),
        server = %sync_config.api.base_url,
        "config loaded"
    );
    let ctx = Ctx::new(&sync_config, cli.token, cli.output == "json")?;

    match cli.command {
        Commands::List { page, limit } => {
            let limit = limit.unwrap_or(sync_config.api.page_size);
            commands::notifications::list(&ctx, page, limit).await?;
        }
        Commands::Unread => commands::notifications::unread(&ctx).await?,
        Commands::Read { id } => commands::notifications::read(&ctx, &id).await?,
        Commands::ReadAll => commands::notifications::read_all(&ctx).await?,
        Commands::Delete { id } => commands::notifications::delete(&ctx, &id).await?,
        Commands::Clear { yes } => {
            if !yes {
                eprint!("Delete every notification? [y/N]: ");
                let mut s = String::new();
                std::io::stdin().read_line(&mut s)?;
                if !s.trim().eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            commands::notifications::clear(&ctx).await?;
        }
        Commands::Prefs => commands::prefs::show(&ctx).await?,
        Commands::PrefsSet {
            categories,
            delivery,
            frequency,
            quiet_hours,
        } => {
            let patch = commands::prefs::build_patch(
                &categories,
                &delivery,
                frequency.as_deref(),
                quiet_hours.as_deref(),
            )?;
            commands::prefs::set(&ctx, &patch).await?;
        }
        Commands::Version => {}
    }

    Ok(())
}
