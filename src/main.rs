//! # PingBox: ambient nudges and reminders over Telegram
//!
//! Usage:
//!   pingbox                         # Run both workers until Ctrl-C
//!   pingbox run --config ./pb.toml  # Explicit config file
//!   pingbox preview "green tea"     # Generate one notification text
//!   pingbox reminders 123456        # List a user's reminders
//!   pingbox providers               # List text generation backends

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pingbox_core::config::PingBoxConfig;
use pingbox_core::types::{UserId, UserMode};
use pingbox_scheduler::cadence::{generation_context, text_or_fallback};
use pingbox_scheduler::recurrence::describe;
use pingbox_scheduler::{
    Cadence, ReminderService, SchedulerEngine, SessionStore, SqliteStore, TelegramTransport, UserService,
};

#[derive(Parser)]
#[command(
    name = "pingbox",
    version,
    about = "🔔 PingBox — ambient item nudges and recurring reminders"
)]
struct Cli {
    /// Config file (default: ~/.pingbox/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the notification and reminder workers
    Run,
    /// Generate one notification text and print it
    Preview {
        /// Item or reminder name to write about
        entity: String,
        /// cozy, rofl or care
        #[arg(short, long, default_value = "cozy")]
        mode: String,
    },
    /// List a user's reminders with their next run
    Reminders {
        /// Telegram user id
        user_id: UserId,
    },
    /// List text generation providers and which ones are configured
    Providers,
}

fn load_config(path: Option<&str>) -> Result<PingBoxConfig> {
    let config = match path {
        Some(p) => {
            let expanded = PathBuf::from(shellexpand::tilde(p).to_string());
            let mut config = PingBoxConfig::load_from(&expanded)
                .with_context(|| format!("loading config from {}", expanded.display()))?;
            config.apply_env_overrides();
            config
        }
        None => PingBoxConfig::load().context("loading default config")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pingbox=debug,pingbox_scheduler=debug,pingbox_providers=debug,pingbox_core=debug"
    } else {
        "pingbox=info,pingbox_scheduler=info,pingbox_providers=info,pingbox_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Preview { entity, mode } => preview(&config, &entity, UserMode::parse(&mode)).await,
        Command::Reminders { user_id } => list_reminders(&config, user_id),
        Command::Providers => {
            list_providers(&config);
            Ok(())
        }
    }
}

async fn run(config: PingBoxConfig) -> Result<()> {
    let db_path = config.database_path();
    let store = Arc::new(SqliteStore::open(&db_path)?);
    tracing::info!("🗄️ Database: {}", db_path.display());

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_secs)));
    let generator = pingbox_providers::create_generator(&config);
    let transport = Arc::new(TelegramTransport::new(&config.telegram));

    let mut engine = SchedulerEngine::new(&config, store, sessions, generator, transport);
    engine.start();
    println!("🔔 PingBox running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("🛑 Shutdown requested");
    engine.shutdown().await;
    Ok(())
}

async fn preview(config: &PingBoxConfig, entity: &str, mode: UserMode) -> Result<()> {
    let cadence = Cadence::from_config(config);
    let tz = cadence.default_tz();
    let local_now = Utc::now().with_timezone(&tz);

    let generator = pingbox_providers::create_generator(config);
    let context = generation_context(entity, &local_now, mode);
    let text = text_or_fallback(generator.as_ref(), &context, cadence.generate_timeout).await;

    println!("{text}");
    Ok(())
}

fn list_reminders(config: &PingBoxConfig, user_id: UserId) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&config.database_path())?);
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_secs)));
    let cadence = Cadence::from_config(config);

    let users = UserService::new(store.clone(), sessions.clone(), cadence.clone(), config.defaults.clone());
    let Some(user) = users.get(user_id)? else {
        println!("⚠️  User {user_id} not found.");
        return Ok(());
    };
    let tz = cadence.timezone_for(&user);

    let reminders = ReminderService::new(store, sessions, cadence).list(user_id)?;
    if reminders.is_empty() {
        println!("📭 No reminders for {user_id}.");
        return Ok(());
    }

    println!("⏰ Reminders for {user_id} ({}):", user.timezone);
    for reminder in reminders {
        let next = if reminder.enabled {
            reminder.next_run.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
        } else {
            "disabled".to_string()
        };
        println!(
            "  #{:<5} {:<24} {:<28} next: {}",
            reminder.id,
            reminder.name,
            describe(&reminder.recurrence, &tz),
            next
        );
    }
    Ok(())
}

fn list_providers(config: &PingBoxConfig) {
    println!("🔌 Providers:");
    for (name, used) in pingbox_providers::provider_listing(config) {
        let mark = if used { "✅" } else { "  " };
        println!("  {mark} {name}");
    }
}
