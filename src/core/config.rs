use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: tgcast.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "tgcast.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: tgcast.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "tgcast.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Custom Bot API server (local telegram-bot-api), if any
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| non_empty_env("BOT_API_URL"));

/// Release endpoint polled by the version checker.
/// Unset disables polling.
pub static VERSION_CHECK_URL: Lazy<Option<String>> = Lazy::new(|| non_empty_env("VERSION_CHECK_URL"));

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring invalid {}={:?}, using default {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    let value = env_u64(key, u64::from(default));
    match u32::try_from(value) {
        Ok(value) => value,
        Err(_) => {
            log::warn!("Ignoring out-of-range {}={}, using default {}", key, value, default);
            default
        }
    }
}

/// SMTP configuration for the email channel
pub mod smtp {
    use once_cell::sync::Lazy;

    /// SMTP relay host. Email broadcasts are unavailable when unset.
    pub static HOST: Lazy<Option<String>> = Lazy::new(|| super::non_empty_env("SMTP_HOST"));

    /// SMTP port (default 587, STARTTLS)
    pub static PORT: Lazy<u16> = Lazy::new(|| {
        std::env::var("SMTP_PORT")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(587)
    });

    pub static USER: Lazy<Option<String>> = Lazy::new(|| super::non_empty_env("SMTP_USER"));

    pub static PASSWORD: Lazy<Option<String>> = Lazy::new(|| super::non_empty_env("SMTP_PASSWORD"));

    /// Sender mailbox, e.g. `Support <noreply@example.com>`
    pub static FROM: Lazy<Option<String>> = Lazy::new(|| super::non_empty_env("SMTP_FROM"));
}

/// Version-check polling configuration
pub mod version_check {
    use super::Duration;

    /// Interval between release polls (in seconds)
    pub const POLL_INTERVAL_SECS: u64 = 6 * 60 * 60;

    /// Timeout for a single release request (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn poll_interval() -> Duration {
        Duration::from_secs(POLL_INTERVAL_SECS)
    }

    pub fn request_timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Tunables for broadcast dispatch.
///
/// Built once at startup and handed to [`crate::broadcast::BroadcastService`];
/// tests construct it directly.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Minimum gap between two Telegram sends, across all runs
    pub telegram_interval: Duration,
    /// Minimum gap between two email sends, across all runs
    pub email_interval: Duration,
    /// Upper bound for one provider send call
    pub send_timeout: Duration,
    /// Backoff before the single retry when the provider gives no hint
    pub transient_backoff: Duration,
    /// Attempts for one progress write before it is given up
    pub store_write_attempts: u32,
    /// How long a finished run stays in the registry to answer late stops
    pub registry_grace: Duration,
    /// Window used by the `expiring` selectors
    pub expiring_days: u32,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            // 25 msg/s keeps us under the documented 30 msg/s bot ceiling
            telegram_interval: Duration::from_millis(40),
            email_interval: Duration::from_millis(200),
            send_timeout: Duration::from_secs(15),
            transient_backoff: Duration::from_secs(1),
            store_write_attempts: 3,
            registry_grace: Duration::from_secs(60),
            expiring_days: 3,
        }
    }
}

impl BroadcastSettings {
    /// Reads `BROADCAST_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            telegram_interval: Duration::from_millis(env_u64(
                "BROADCAST_TELEGRAM_INTERVAL_MS",
                defaults.telegram_interval.as_millis() as u64,
            )),
            email_interval: Duration::from_millis(env_u64(
                "BROADCAST_EMAIL_INTERVAL_MS",
                defaults.email_interval.as_millis() as u64,
            )),
            send_timeout: Duration::from_secs(env_u64(
                "BROADCAST_SEND_TIMEOUT_SECS",
                defaults.send_timeout.as_secs(),
            )),
            transient_backoff: Duration::from_millis(env_u64(
                "BROADCAST_TRANSIENT_BACKOFF_MS",
                defaults.transient_backoff.as_millis() as u64,
            )),
            store_write_attempts: env_u64(
                "BROADCAST_STORE_WRITE_ATTEMPTS",
                u64::from(defaults.store_write_attempts),
            )
            .clamp(1, 10) as u32,
            registry_grace: Duration::from_secs(env_u64(
                "BROADCAST_REGISTRY_GRACE_SECS",
                defaults.registry_grace.as_secs(),
            )),
            expiring_days: env_u32("BROADCAST_EXPIRING_DAYS", defaults.expiring_days),
        }
    }

    /// Settings with zero pacing and backoff, for tests that don't measure time.
    pub fn unthrottled() -> Self {
        Self {
            telegram_interval: Duration::ZERO,
            email_interval: Duration::ZERO,
            transient_backoff: Duration::ZERO,
            registry_grace: Duration::ZERO,
            ..Self::default()
        }
    }
}
