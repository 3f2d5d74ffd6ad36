// Telegram 中转后端

pub mod client;
pub mod file_type;
pub mod types;

pub use client::{SendFile, SendFileParams, TelegramClient};
pub use file_type::{classify_mime, classify_url, mime_from_name, TelegramFileType};
pub use types::{file_details, FileDetails, Message, TelegramResponse};
