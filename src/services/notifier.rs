//! Telegram 通知.
//!
//! 通知是尽力而为的: 未配置时只记录警告, 发送失败也不会影响续期流程.

use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    pub async fn send_message(&self, text: &str) -> AppResult<()> {
        let (token, chat_id) = match (&self.config.bot_token, &self.config.chat_id) {
            (Some(token), Some(chat_id)) => (token, chat_id),
            _ => {
                return Err(AppError::Notification(
                    "TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID is not set".to_string(),
                ))
            }
        };

        let url = format!("{}/bot{}/sendMessage", self.config.api_base, token);
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("Telegram request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Telegram sendMessage failed: {} - {}",
                status, body
            )));
        }

        debug!("Telegram 通知已发送");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        if !self.config.is_configured() {
            warn!("⚠️ 未配置 Telegram, 跳过通知");
            return;
        }

        if let Err(e) = self.send_message(text).await {
            warn!("⚠️ Telegram 通知发送失败: {}", e);
        }
    }
}
