use crate::config::DirectTarget;
use crate::error::{AppError, AppResult};
use crate::services::{FreeCloudClient, Notifier};
use crate::utils::escape_markdown;
use tracing::{error, info};

/// 直连模式: 登录面板后续期一台机器
pub struct DirectRenewer {
    client: FreeCloudClient,
    notifier: Box<dyn Notifier>,
}

impl DirectRenewer {
    pub fn new(client: FreeCloudClient, notifier: Box<dyn Notifier>) -> Self {
        Self { client, notifier }
    }

    pub async fn run(&self, target: &DirectTarget) -> AppResult<String> {
        match self.renew(target).await {
            Ok(message) => {
                info!("✅ 续期成功: {}", message);
                self.notifier
                    .notify(&format!(
                        "✅ *FreeCloud 续期成功*\n端口: {}\n{}",
                        escape_markdown(&target.port.to_string()),
                        escape_markdown(&message)
                    ))
                    .await;
                Ok(message)
            }
            Err(e) => {
                match &e {
                    AppError::Renew(message) => error!("❌ 续期失败: {}", message),
                    other => error!("🚨 错误: {}", other),
                }
                self.notifier
                    .notify(&format!(
                        "❌ *FreeCloud 续期失败*\n端口: {}\n{}",
                        escape_markdown(&target.port.to_string()),
                        escape_markdown(&e.to_string())
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn renew(&self, target: &DirectTarget) -> AppResult<String> {
        let cookie = self.client.login(&target.username, &target.password).await?;
        let response = self.client.renew(&target.port, &cookie).await?;

        if !response.success {
            return Err(AppError::Renew(response.message));
        }
        Ok(response.message)
    }
}
