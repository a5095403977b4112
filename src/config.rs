use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::models::{Account, MachineId};
use crate::services::ThrottlePolicy;
use crate::utils::split_list;

#[derive(Debug, Clone)]
pub struct Config {
    pub freecloud: FreeCloudConfig,
    pub relay: RelayConfig,
    pub telegram: TelegramConfig,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FreeCloudConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub accounts: Option<String>, // 原始 JSON, 使用时再解析
    pub endpoints: Vec<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub throttle_min_ms: u64,
    pub throttle_max_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// 直连模式的续期目标
#[derive(Debug, Clone, PartialEq)]
pub struct DirectTarget {
    pub username: String,
    pub password: String,
    pub port: MachineId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            freecloud: FreeCloudConfig {
                base_url: "https://freecloud.ltd".to_string(),
                username: None,
                password: None,
                port: None,
            },
            relay: RelayConfig {
                accounts: None,
                endpoints: Vec::new(),
                max_retries: 2,
                retry_delay_ms: 2000,
                throttle_min_ms: 1000,
                throttle_max_ms: 2000,
            },
            telegram: TelegramConfig {
                api_base: "https://api.telegram.org".to_string(),
                bot_token: None,
                chat_id: None,
            },
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源加载配置, 空字符串视为未设置
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();

        if let Some(base_url) = get("FREECLOUD_BASE_URL") {
            config.freecloud.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.freecloud.username = get("FREECLOUD_USERNAME");
        config.freecloud.password = lookup("FREECLOUD_PASSWORD").filter(|v| !v.is_empty());
        config.freecloud.port = get("FREECLOUD_PORT");

        // 中转相关配置
        config.relay.accounts = get("FREECLOUD_ACCOUNTS");
        if let Some(endpoints) = get("FREECLOUD_RELAY_ENDPOINTS") {
            config.relay.endpoints = split_list(&endpoints);
        }
        if let Some(v) = get("RELAY_MAX_RETRIES") {
            config.relay.max_retries = parse_number("RELAY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RELAY_RETRY_DELAY_MS") {
            config.relay.retry_delay_ms = parse_number("RELAY_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("RELAY_THROTTLE_MIN_MS") {
            config.relay.throttle_min_ms = parse_number("RELAY_THROTTLE_MIN_MS", &v)?;
        }
        if let Some(v) = get("RELAY_THROTTLE_MAX_MS") {
            config.relay.throttle_max_ms = parse_number("RELAY_THROTTLE_MAX_MS", &v)?;
        }
        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &v)?);
        }

        // Telegram
        if let Some(api_base) = get("TELEGRAM_API_BASE") {
            config.telegram.api_base = api_base.trim_end_matches('/').to_string();
        }
        config.telegram.bot_token = get("TELEGRAM_BOT_TOKEN");
        config.telegram.chat_id = get("TELEGRAM_CHAT_ID");

        Ok(config)
    }

    pub fn direct_target(&self) -> AppResult<DirectTarget> {
        let missing = |name: &str| AppError::Configuration(format!("{} is not set", name));

        let username = self
            .freecloud
            .username
            .clone()
            .ok_or_else(|| missing("FREECLOUD_USERNAME"))?;
        let password = self
            .freecloud
            .password
            .clone()
            .ok_or_else(|| missing("FREECLOUD_PASSWORD"))?;
        let port = self
            .freecloud
            .port
            .as_deref()
            .ok_or_else(|| missing("FREECLOUD_PORT"))?;

        let port = match port.parse::<u64>() {
            Ok(n) => MachineId::Number(n),
            Err(_) => MachineId::Text(port.to_string()),
        };

        Ok(DirectTarget {
            username,
            password,
            port,
        })
    }

    pub fn relay_accounts(&self) -> AppResult<Vec<Account>> {
        let raw = self
            .relay
            .accounts
            .as_deref()
            .ok_or_else(|| AppError::Configuration("FREECLOUD_ACCOUNTS is not set".to_string()))?;
        Account::parse_list(raw)
    }

    pub fn relay_endpoints(&self) -> AppResult<&[String]> {
        if self.relay.endpoints.is_empty() {
            return Err(AppError::Configuration(
                "FREECLOUD_RELAY_ENDPOINTS is not set".to_string(),
            ));
        }
        Ok(&self.relay.endpoints)
    }

    /// 只在中转模式下校验
    pub fn relay_throttle(&self) -> AppResult<ThrottlePolicy> {
        let (min, max) = (self.relay.throttle_min_ms, self.relay.throttle_max_ms);
        if max < min {
            return Err(AppError::Configuration(format!(
                "RELAY_THROTTLE_MAX_MS ({}) is below RELAY_THROTTLE_MIN_MS ({})",
                max, min
            )));
        }
        Ok(ThrottlePolicy {
            min_delay_ms: min,
            max_delay_ms: max,
        })
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> AppResult<T> {
    value
        .parse()
        .map_err(|_| AppError::Configuration(format!("{} must be a number, got {:?}", key, value)))
}
