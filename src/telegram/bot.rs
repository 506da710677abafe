//! Bot instance creation

use reqwest::ClientBuilder;
use std::time::Duration;
use teloxide::Bot;

use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// HTTP timeout for Bot API calls; a per-send deadline is enforced separately.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(AppError)` - Missing token, invalid BOT_API_URL or client build failure
pub fn create_bot() -> AppResult<Bot> {
    if config::BOT_TOKEN.is_empty() {
        return Err(AppError::Config("BOT_TOKEN is not set".to_string()));
    }

    let client = ClientBuilder::new().timeout(CLIENT_TIMEOUT).build()?;
    let bot = Bot::with_client(config::BOT_TOKEN.as_str(), client);

    let bot = match config::BOT_API_URL.as_deref() {
        Some(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            bot.set_api_url(url::Url::parse(bot_api_url)?)
        }
        None => bot,
    };

    Ok(bot)
}
