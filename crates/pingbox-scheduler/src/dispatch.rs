//! Telegram dispatch: delivers notification text via the Bot API `sendMessage`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use pingbox_core::config::TelegramConfig;
use pingbox_core::error::{PingBoxError, Result};
use pingbox_core::traits::Transport;
use pingbox_core::types::UserId;

/// Bot API hard limit for one message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Plain-text sender bound to one bot token.
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    timeout: Duration,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            timeout: Duration::from_secs(config.send_timeout_secs.max(1)),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, user_id: UserId, text: &str) -> Result<()> {
        if self.bot_token.is_empty() {
            return Err(PingBoxError::Config("Telegram bot token is not set".into()));
        }
        let body = serde_json::json!({
            "chat_id": user_id,
            "text": truncate(text),
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PingBoxError::Transport(format!("sendMessage failed: {e}")))?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        check_response(status.as_u16(), &raw)?;
        tracing::debug!("✅ Telegram message delivered to {}", user_id);
        Ok(())
    }
}

/// A non-2xx status or `"ok": false` is a failed send.
fn check_response(status: u16, raw: &str) -> Result<()> {
    let parsed: Option<TelegramApiResponse> = serde_json::from_str(raw).ok();
    let description = parsed
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| raw.chars().take(200).collect());

    if !(200..300).contains(&status) {
        return Err(PingBoxError::Transport(format!("Telegram API error {status}: {description}")));
    }
    match parsed {
        Some(r) if r.ok => Ok(()),
        Some(_) => Err(PingBoxError::Transport(format!("Send failed: {description}"))),
        None => Err(PingBoxError::Transport(format!("Invalid send response: {description}"))),
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let config = TelegramConfig {
            bot_token: "123:abc".into(),
            api_base: "http://localhost:8081/".into(),
            send_timeout_secs: 5,
        };
        let transport = TelegramTransport::new(&config);
        assert_eq!(transport.api_url("sendMessage"), "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn test_check_response() {
        assert!(check_response(200, r#"{"ok":true,"result":{"message_id":1}}"#).is_ok());

        let err = check_response(200, r#"{"ok":false,"description":"chat not found"}"#).unwrap_err();
        assert!(err.to_string().contains("chat not found"));

        let err = check_response(403, r#"{"ok":false,"description":"Forbidden: bot was blocked by the user"}"#)
            .unwrap_err();
        assert!(matches!(err, PingBoxError::Transport(ref m) if m.contains("403") && m.contains("blocked")));

        assert!(check_response(502, "<html>Bad Gateway</html>").is_err());
        assert!(check_response(200, "not json").is_err());
    }

    #[test]
    fn test_truncate_long_text() {
        assert_eq!(truncate("hi"), "hi");
        let long = "ж".repeat(MAX_MESSAGE_CHARS + 10);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), MAX_MESSAGE_CHARS);
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn test_missing_token_is_config_error() {
        let transport = TelegramTransport::new(&TelegramConfig::default());
        let err = transport.send(1, "hello").await.unwrap_err();
        assert!(matches!(err, PingBoxError::Config(_)));
    }
}
