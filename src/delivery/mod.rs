//! Message rendering and delivery to the Telegram Bot API.

mod format;
mod telegram;

pub use format::{
    cap_message, escape_markdown, format_message, MAX_MESSAGE_CHARS, MAX_SUMMARY_CHARS,
    MAX_TITLE_CHARS,
};
pub use telegram::{mask_token, DeliveryConfig, DeliveryError, TelegramClient, ValidationError};
