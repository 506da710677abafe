use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use tgcast::broadcast::model::Pagination;
use tgcast::broadcast::{AudienceResolver, BroadcastError, BroadcastService, EmailSender, RunStatus, RunStore};
use tgcast::cli::{Cli, Commands, SendArgs};
use tgcast::core::version_check::{start_version_poller, VersionChecker};
use tgcast::core::{config, init_logger, log_startup_configuration, metrics, BroadcastSettings};
use tgcast::email::SmtpEmailSender;
use tgcast::storage::{create_pool, DbPool, SqliteRunStore, SqliteUserStore};
use tgcast::telegram::{create_bot, TelegramSender};

/// Main entry point for the broadcast CLI
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot creation)
/// or the requested run cannot be started.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;

    let pool = create_pool(&config::DATABASE_PATH).context("Failed to open database")?;

    match cli.command {
        Commands::Migrate => {
            log::info!("Migrations applied to {}", *config::DATABASE_PATH);
            Ok(())
        }
        // Read-only commands work without a bot token.
        Commands::Preview { target } => {
            let settings = BroadcastSettings::from_env();
            let resolver = AudienceResolver::new(Arc::new(SqliteUserStore::new(pool, settings.expiring_days)));
            println!("{}", resolver.count(&target).await?);
            Ok(())
        }
        Commands::Status { id } => {
            let run = SqliteRunStore::new(pool)
                .get(id)
                .await?
                .ok_or(BroadcastError::RunNotFound(id))?;
            print_json(&run)
        }
        Commands::List { limit, offset } => {
            print_json(&SqliteRunStore::new(pool).list(Pagination { limit, offset }).await?)
        }
        Commands::Send(args) => run_send(&pool, args).await,
    }
}

fn build_service(pool: &DbPool, settings: BroadcastSettings) -> Result<BroadcastService> {
    let bot = create_bot()?;
    let email = SmtpEmailSender::from_config()?.map(|sender| Arc::new(sender) as Arc<dyn EmailSender>);

    Ok(BroadcastService::new(
        Arc::new(SqliteUserStore::new(pool.clone(), settings.expiring_days)),
        Arc::new(SqliteRunStore::new(pool.clone())),
        Arc::new(TelegramSender::new(bot)),
        email,
        settings,
    ))
}

/// Submits a run and follows it; Ctrl-C requests a cooperative stop.
async fn run_send(pool: &DbPool, args: SendArgs) -> Result<()> {
    let settings = BroadcastSettings::from_env();
    log_startup_configuration(&settings);

    let service = build_service(pool, settings)?;
    service.recover_interrupted().await?;

    let shutdown = CancellationToken::new();
    let poller = match config::VERSION_CHECK_URL.as_deref() {
        Some(url) => Some(start_version_poller(Arc::new(VersionChecker::new(url)?), shutdown.clone())),
        None => None,
    };

    let print_metrics = args.print_metrics;
    let run = service.submit(args.into_request()).await?;
    log::info!("Broadcast run {} queued", run.id);

    let finished = tokio::select! {
        finished = service.wait(run.id) => finished?,
        _ = signal::ctrl_c() => {
            log::warn!("Interrupt received, stopping broadcast run {}", run.id);
            service.stop(run.id).await?;
            service.wait(run.id).await?
        }
    };

    shutdown.cancel();
    if let Some(poller) = poller {
        let _ = poller.await;
    }

    if print_metrics {
        eprintln!("{}", metrics::render());
    }
    print_json(&finished)?;

    if finished.status == RunStatus::Failed {
        anyhow::bail!(
            "Broadcast run {} failed: {}",
            finished.id,
            finished.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
