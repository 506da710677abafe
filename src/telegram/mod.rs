//! Telegram channel

pub mod bot;
pub mod sender;

pub use bot::create_bot;
pub use sender::TelegramSender;
