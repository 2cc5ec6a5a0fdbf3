//! 告警投递接口的实现
//!
//! - `TelegramSink`: 通过 Telegram Bot API 推送 HTML 文本
//! - `TelegramCommandSource`: 长轮询拉取会话里的运维指令
//! - `LogSink`: 只写日志，用于本地调试与回放

pub mod log;
pub mod telegram;

pub use self::log::LogSink;
pub use telegram::{TelegramCommandSource, TelegramSink};
