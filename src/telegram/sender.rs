//! Telegram delivery via teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, ParseMode};
use teloxide::{ApiError, RequestError};

use crate::broadcast::dispatcher::{MessageSender, TelegramMessage};
use crate::broadcast::error::DeliveryError;
use crate::broadcast::model::MediaKind;

/// Sends broadcast messages as HTML, media by already-uploaded file id.
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send_message(&self, chat_id: i64, message: &TelegramMessage) -> Result<(), DeliveryError> {
        let chat = ChatId(chat_id);

        let result = match (&message.media, &message.text) {
            (Some(media), caption) => {
                let file = InputFile::file_id(FileId(media.file_id.clone()));
                match media.kind {
                    MediaKind::Photo => {
                        let mut request = self.bot.send_photo(chat, file).parse_mode(ParseMode::Html);
                        if let Some(caption) = caption {
                            request = request.caption(caption.clone());
                        }
                        request.await.map(|_| ())
                    }
                    MediaKind::Video => {
                        let mut request = self.bot.send_video(chat, file).parse_mode(ParseMode::Html);
                        if let Some(caption) = caption {
                            request = request.caption(caption.clone());
                        }
                        request.await.map(|_| ())
                    }
                    MediaKind::Document => {
                        let mut request = self.bot.send_document(chat, file).parse_mode(ParseMode::Html);
                        if let Some(caption) = caption {
                            request = request.caption(caption.clone());
                        }
                        request.await.map(|_| ())
                    }
                }
            }
            (None, Some(text)) => self
                .bot
                .send_message(chat, text.clone())
                .parse_mode(ParseMode::Html)
                .await
                .map(|_| ()),
            (None, None) => {
                return Err(DeliveryError::RecipientPermanentError(
                    "message has neither text nor media".to_string(),
                ))
            }
        };

        result.map_err(classify_request_error)
    }
}

/// Maps a Bot API failure onto the delivery taxonomy.
pub fn classify_request_error(error: RequestError) -> DeliveryError {
    match error {
        RequestError::Api(api) => classify_api_error(api),
        RequestError::RetryAfter(after) => DeliveryError::rate_limited("flood control", after.duration()),
        RequestError::Network(e) => DeliveryError::transient(format!("network: {}", e)),
        RequestError::Io(e) => DeliveryError::transient(format!("io: {}", e)),
        other => DeliveryError::RecipientPermanentError(other.to_string()),
    }
}

fn classify_api_error(error: ApiError) -> DeliveryError {
    match error {
        ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::ChatNotFound
        | ApiError::UserDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots => DeliveryError::RecipientBlocked(error.to_string()),
        ApiError::Unknown(description) if is_server_side(&description) => {
            DeliveryError::transient(format!("Bot API: {}", description))
        }
        other => DeliveryError::RecipientPermanentError(other.to_string()),
    }
}

/// Gateway and overload replies from the Bot API servers surface as
/// unrecognized API errors.
fn is_server_side(description: &str) -> bool {
    ["Bad Gateway", "Service Unavailable", "Gateway Timeout", "Too Many Requests"]
        .iter()
        .any(|marker| description.contains(marker))
}
