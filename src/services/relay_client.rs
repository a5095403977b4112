use crate::error::{AppError, AppResult};
use crate::models::RelayRequest;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// 中转续期通道
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// 发送续期请求, 返回原始响应体
    async fn post(&self, endpoint: &str, request: &RelayRequest<'_>) -> AppResult<String>;
}

pub struct HttpRelayTransport {
    client: Client,
}

impl HttpRelayTransport {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn post(&self, endpoint: &str, request: &RelayRequest<'_>) -> AppResult<String> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("{}: {}", endpoint, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Transient(format!("{}: {}", endpoint, e)))?;
        // 状态码不参与判断, 由响应体决定结果
        debug!("中转响应 {} ({}): {}", endpoint, status, body);
        Ok(body)
    }
}
