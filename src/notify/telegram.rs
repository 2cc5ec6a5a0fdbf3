//! Telegram Bot 投递与指令拉取
//!
//! 所有频道发往同一个会话，频道只体现在文本的 `#标签` 上。
//! 指令通过 `getUpdates` 长轮询拉取，只接受配置会话发来的 `/指令 参数` 消息。

use crate::common::{AppError, Result};
use crate::filter::{Channel, NotificationSink};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, trace};

const TELEGRAM_TARGET: &str = "告警投递";
const COMMAND_TARGET: &str = "运维指令";

/// `getUpdates` 长轮询的服务端等待秒数
const POLL_TIMEOUT_SECS: u64 = 10;

/// Bot 令牌的环境变量名
pub const TOKEN_ENV: &str = "TELEGRAM_TOKEN";
/// 接收会话的环境变量名
pub const CHAT_ID_ENV: &str = "TELEGRAM_USERID";

#[derive(Serialize, Debug)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Clone)]
pub struct TelegramSink {
    client: Client,
    endpoint: String,
    chat_id: String,
}

// 令牌在 endpoint 里，不能打印
impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink").field("chat_id", &self.chat_id).finish()
    }
}

impl TelegramSink {
    pub fn new(api_url: &str, token: &str, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::NotifyError(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self {
            client,
            endpoint: send_message_url(api_url, token),
            chat_id,
        })
    }

    /// 从 `TELEGRAM_TOKEN` 与 `TELEGRAM_USERID` 读取凭据
    pub fn from_env(api_url: &str) -> Result<Self> {
        let (token, chat_id) = read_credentials()?;
        Self::new(api_url, &token, chat_id)
    }
}

fn send_message_url(api_url: &str, token: &str) -> String {
    bot_method_url(api_url, token, "sendMessage")
}

fn bot_method_url(api_url: &str, token: &str, method: &str) -> String {
    format!("{}/bot{}/{}", api_url.trim_end_matches('/'), token, method)
}

fn read_credentials() -> Result<(String, String)> {
    let token = std::env::var(TOKEN_ENV)
        .map_err(|_| AppError::ConfigError(format!("缺少环境变量 {}", TOKEN_ENV)))?;
    let chat_id = std::env::var(CHAT_ID_ENV)
        .map_err(|_| AppError::ConfigError(format!("缺少环境变量 {}", CHAT_ID_ENV)))?;
    Ok((token, chat_id))
}

#[async_trait]
impl NotificationSink for TelegramSink {
    #[instrument(target = "告警投递", skip(self, text), err)]
    async fn post(&self, channel: Channel, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let err = AppError::NotifyError(format!("Telegram 返回 {}: {}", status, detail));
            error!(
                target: TELEGRAM_TARGET,
                status = %status,
                error.summary = err.get_error_type_summary(),
                error.details = %err,
                "推送失败"
            );
            return Err(err);
        }

        debug!(target: TELEGRAM_TARGET, channel = %channel, "推送成功");
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<IncomingMessage>,
}

#[derive(Deserialize, Debug)]
struct IncomingMessage {
    chat: Chat,
    #[serde(default)]
    from: Option<Sender>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct Sender {
    id: i64,
}

/// 一条运维指令：名称保留前导 `/`，参数为其余文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCommand {
    pub name: String,
    pub args: String,
}

/// 把 `/set window 3` 或 `/set@SomeBot window 3` 拆成指令名和参数
///
/// 不以 `/` 开头的普通消息返回 `None`。
pub fn parse_bot_command(text: &str) -> Option<BotCommand> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let (head, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let name = head.split('@').next().unwrap_or(head);
    if name.len() <= 1 {
        return None;
    }
    Some(BotCommand {
        name: name.to_string(),
        args: args.trim().to_string(),
    })
}

/// 从一批更新中取出授权会话的指令，并给出下一次拉取的 offset
///
/// offset 取所有更新（含被忽略的）的最大 `update_id + 1`，被忽略的消息也不会重复拉取。
fn extract_commands(updates: &[Update], chat_id: &str) -> (Vec<BotCommand>, Option<i64>) {
    let next_offset = updates.iter().map(|u| u.update_id + 1).max();
    let commands = updates
        .iter()
        .filter_map(|u| u.message.as_ref())
        .filter(|m| {
            let authorized = m.chat.id.to_string() == chat_id
                || m.from.as_ref().map_or(false, |f| f.id.to_string() == chat_id);
            if !authorized {
                trace!(target: COMMAND_TARGET, chat = m.chat.id, "忽略未授权会话的消息");
            }
            authorized
        })
        .filter_map(|m| m.text.as_deref())
        .filter_map(parse_bot_command)
        .collect();
    (commands, next_offset)
}

/// 通过 `getUpdates` 长轮询拉取运维指令
pub struct TelegramCommandSource {
    client: Client,
    endpoint: String,
    chat_id: String,
    offset: i64,
}

impl std::fmt::Debug for TelegramCommandSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCommandSource")
            .field("chat_id", &self.chat_id)
            .field("offset", &self.offset)
            .finish()
    }
}

impl TelegramCommandSource {
    pub fn new(api_url: &str, token: &str, chat_id: String) -> Result<Self> {
        // 客户端超时要长于服务端的长轮询等待
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .map_err(|e| AppError::NotifyError(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self {
            client,
            endpoint: bot_method_url(api_url, token, "getUpdates"),
            chat_id,
            offset: 0,
        })
    }

    /// 从 `TELEGRAM_TOKEN` 与 `TELEGRAM_USERID` 读取凭据
    pub fn from_env(api_url: &str) -> Result<Self> {
        let (token, chat_id) = read_credentials()?;
        Self::new(api_url, &token, chat_id)
    }

    /// 等待下一批指令；没有新消息时在长轮询结束后返回空列表
    pub async fn next_commands(&mut self) -> Result<Vec<BotCommand>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("timeout", POLL_TIMEOUT_SECS as i64), ("offset", self.offset)])
            .send()
            .await?;

        let status = response.status();
        let body: UpdatesResponse = response.json().await?;
        if !body.ok {
            return Err(AppError::NotifyError(format!(
                "Telegram getUpdates 返回 {}: {}",
                status,
                body.description.unwrap_or_default()
            )));
        }

        let (commands, next_offset) = extract_commands(&body.result, &self.chat_id);
        if let Some(offset) = next_offset {
            self.offset = offset;
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_url() {
        assert_eq!(
            send_message_url("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_payload_uses_html_parse_mode() {
        let body = SendMessage {
            chat_id: "42",
            text: "<b>#UP(1) #FOO(S)</b>",
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], "42");
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(json["disable_web_page_preview"], true);
    }

    #[test]
    fn test_debug_hides_token() {
        let sink = TelegramSink::new("https://api.telegram.org", "secret-token", "42".to_string()).unwrap();
        assert!(!format!("{:?}", sink).contains("secret-token"));
    }

    fn updates(json: &str) -> Vec<Update> {
        let response: UpdatesResponse = serde_json::from_str(json).unwrap();
        assert!(response.ok);
        response.result
    }

    #[test]
    fn test_parse_bot_command() {
        assert_eq!(
            parse_bot_command("/set window 3"),
            Some(BotCommand { name: "/set".to_string(), args: "window 3".to_string() })
        );
        assert_eq!(
            parse_bot_command("  /mute@FilterBot   up "),
            Some(BotCommand { name: "/mute".to_string(), args: "up".to_string() })
        );
        assert_eq!(
            parse_bot_command("/working"),
            Some(BotCommand { name: "/working".to_string(), args: String::new() })
        );
        assert_eq!(parse_bot_command("hello"), None);
        assert_eq!(parse_bot_command("/"), None);
    }

    #[test]
    fn test_extract_commands_only_from_authorized_chat() {
        let batch = updates(
            r#"{"ok":true,"result":[
                {"update_id":100,"message":{"chat":{"id":42},"from":{"id":42},"text":"/ignore FOOUSDT"}},
                {"update_id":101,"message":{"chat":{"id":7},"from":{"id":7},"text":"/unmute all"}},
                {"update_id":102,"message":{"chat":{"id":42},"text":"not a command"}},
                {"update_id":103,"edited_message":{"chat":{"id":42},"text":"/restart"}},
                {"update_id":104,"message":{"chat":{"id":-900},"from":{"id":42},"text":"/set up 3"}}
            ]}"#,
        );

        let (commands, next_offset) = extract_commands(&batch, "42");
        assert_eq!(
            commands,
            vec![
                BotCommand { name: "/ignore".to_string(), args: "FOOUSDT".to_string() },
                BotCommand { name: "/set".to_string(), args: "up 3".to_string() },
            ]
        );
        assert_eq!(next_offset, Some(105));
    }

    #[test]
    fn test_extract_commands_from_empty_poll() {
        let (commands, next_offset) = extract_commands(&updates(r#"{"ok":true,"result":[]}"#), "42");
        assert!(commands.is_empty());
        assert_eq!(next_offset, None);
    }

    #[test]
    fn test_get_updates_url() {
        assert_eq!(
            bot_method_url("https://api.telegram.org", "123:abc", "getUpdates"),
            "https://api.telegram.org/bot123:abc/getUpdates"
        );
    }
}
