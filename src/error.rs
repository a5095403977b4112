use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("无法识别验证码: {0}")]
    CaptchaParse(String),

    #[error("登录失败: {0}")]
    Login(String),

    #[error("续期失败: {0}")]
    Renew(String),

    // 中转服务明确返回的失败, 不重试
    #[error("Relay rejected request: {0}")]
    SignaledFailure(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl AppError {
    /// 是否属于可重试的临时错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::HttpRequest(_) | AppError::JsonError(_) | AppError::Transient(_)
        )
    }
}
