use crate::error::{AppError, AppResult};
use crate::models::{FreeCloudResponse, LoginRequest, MachineId};
use crate::services::CaptchaSolver;
use crate::utils::mask_username;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

/// 续期接口的返回
#[derive(Debug, Clone, PartialEq)]
pub struct RenewResponse {
    pub success: bool,
    pub message: String,
}

/// FreeCloud 面板客户端: 登录 + 续期
pub struct FreeCloudClient {
    client: Client,
    base_url: String,
    captcha_solver: CaptchaSolver,
}

impl FreeCloudClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            captcha_solver: CaptchaSolver::new()?,
        })
    }

    fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    fn renew_url(&self, port: &MachineId) -> String {
        format!("{}/server/detail/{}/renew", self.base_url, port)
    }

    /// 登录并返回会话 Cookie
    pub async fn login(&self, username: &str, password: &str) -> AppResult<String> {
        info!("开始 FreeCloud 登录流程: {}", mask_username(username));

        // 1. 访问登录页面, 解析验证码
        let login_url = self.login_url();
        let page = self.client.get(&login_url).send().await?;
        let page_cookies = extract_cookies(page.headers());
        let html = page.text().await?;
        let captcha_answer = self.captcha_solver.solve(&html)?;

        // 2. 提交登录
        let mut request = self
            .client
            .post(&login_url)
            .header("Referer", &login_url)
            .header("X-Requested-With", "XMLHttpRequest")
            .json(&LoginRequest {
                username,
                password,
                math_captcha: captcha_answer,
            });
        if !page_cookies.is_empty() {
            request = request.header(COOKIE, join_cookies(&page_cookies));
        }

        let response = request.send().await?;
        let status = response.status();
        let login_cookies = extract_cookies(response.headers());
        let body = response.text().await?;

        debug!("登录响应状态: {}, 内容: {}", status, body);

        let result = FreeCloudResponse::from_body(&body);
        if status != StatusCode::OK || result.signals_failure() {
            let reason = result
                .message
                .unwrap_or_else(|| status_reason(status));
            return Err(AppError::Login(reason));
        }

        // 3. 提取会话 Cookie
        if login_cookies.is_empty() {
            return Err(AppError::Login("未获取到登录 Cookie".to_string()));
        }
        let cookie = join_cookies(&merge_cookies(page_cookies, login_cookies));

        info!("登录成功: {}", mask_username(username));
        Ok(cookie)
    }

    /// 调用续期接口
    pub async fn renew(&self, port: &MachineId, cookie: &str) -> AppResult<RenewResponse> {
        info!("发送续期请求, 端口: {}", port);

        let response = self
            .client
            .post(self.renew_url(port))
            .header(COOKIE, cookie)
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("续期响应状态: {}, 内容: {}", status, body);

        let result = FreeCloudResponse::from_body(&body);
        let success = status == StatusCode::OK && !result.signals_failure();
        let message = match result.message {
            Some(message) => message,
            None if success => String::new(),
            None => status_reason(status),
        };

        Ok(RenewResponse { success, message })
    }
}

fn status_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

/// 取出每个 set-cookie 的 name=value 部分
fn extract_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// 同名 Cookie 以后者为准, 保持首次出现的顺序
fn merge_cookies(
    base: Vec<(String, String)>,
    update: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut merged = base;
    for (name, value) in update {
        match merged.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => merged.push((name, value)),
        }
    }
    merged
}

fn join_cookies(cookies: &[(String, String)]) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}
