//! Logging initialization and configuration checking
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Startup diagnostics for the delivery channels

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config::{self, BroadcastSettings};

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs which delivery channels are usable and how they are paced.
///
/// Secrets are never printed, only whether they are present.
pub fn log_startup_configuration(settings: &BroadcastSettings) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("📣 Broadcast Configuration Check");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if config::BOT_TOKEN.is_empty() {
        log::warn!("⚠️  BOT_TOKEN: not set, Telegram broadcasts will fail");
    } else {
        log::info!("✅ BOT_TOKEN: set");
    }
    if let Some(ref url) = *config::BOT_API_URL {
        log::info!("   Custom Bot API: {}", url);
    }

    match (&*config::smtp::HOST, &*config::smtp::FROM) {
        (Some(host), Some(_)) => {
            log::info!("✅ SMTP: {}:{}", host, *config::smtp::PORT);
            if config::smtp::USER.is_none() || config::smtp::PASSWORD.is_none() {
                log::warn!("   SMTP credentials missing, relay must allow anonymous submit");
            }
        }
        (Some(_), None) => log::warn!("⚠️  SMTP_HOST set but SMTP_FROM missing, email channel disabled"),
        _ => log::warn!("⚠️  SMTP: not configured, email channel disabled"),
    }

    log::info!(
        "   Pacing: telegram every {:?}, email every {:?}, send timeout {:?}",
        settings.telegram_interval,
        settings.email_interval,
        settings.send_timeout
    );
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tgcast.log");
        assert!(!path.exists());

        // Only the global logger install may fail (another test got there first).
        if let Err(e) = init_logger(path.to_str().unwrap()) {
            assert!(e.to_string().contains("Failed to initialize logger"), "{}", e);
        }
        assert!(path.exists());
    }

    #[test]
    fn test_init_logger_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("tgcast.log");

        let err = init_logger(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Failed to create log file"), "{}", err);
    }

    #[test]
    fn test_log_startup_configuration_runs() {
        log_startup_configuration(&BroadcastSettings::default());
    }
}
