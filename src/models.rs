use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::error::{AppError, AppResult};

// 账号配置
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub machines: Vec<MachineId>,
}

/// 机器(端口)标识, 原样转发给中转服务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MachineId {
    Number(u64),
    Text(String),
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineId::Number(n) => write!(f, "{}", n),
            MachineId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for MachineId {
    fn from(value: u64) -> Self {
        MachineId::Number(value)
    }
}

impl Account {
    /// 解析 FREECLOUD_ACCOUNTS, 格式不对的条目跳过
    pub fn parse_list(raw: &str) -> AppResult<Vec<Account>> {
        if raw.trim().is_empty() {
            return Err(AppError::Configuration(
                "FREECLOUD_ACCOUNTS is empty".to_string(),
            ));
        }

        let value: Value = serde_json::from_str(raw).map_err(|e| {
            AppError::Configuration(format!("FREECLOUD_ACCOUNTS is not valid JSON: {}", e))
        })?;

        let entries = value.as_array().ok_or_else(|| {
            AppError::Configuration("FREECLOUD_ACCOUNTS must be a JSON array".to_string())
        })?;

        if entries.is_empty() {
            return Err(AppError::Configuration(
                "FREECLOUD_ACCOUNTS contains no accounts".to_string(),
            ));
        }

        let accounts = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match Account::from_value(entry) {
                Some(account) => Some(account),
                None => {
                    warn!("⚠️ 跳过第 {} 个账号: 缺少 username/password 或 machines 不是数组", index + 1);
                    None
                }
            })
            .collect();

        Ok(accounts)
    }

    fn from_value(entry: &Value) -> Option<Account> {
        let username = entry.get("username")?.as_str()?;
        let password = entry.get("password")?.as_str()?;
        let machines = entry.get("machines")?.as_array()?;

        let machines = machines
            .iter()
            .filter_map(|m| match serde_json::from_value::<MachineId>(m.clone()) {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("⚠️ 账号 {} 的机器标识无法识别: {}", username, m);
                    None
                }
            })
            .collect();

        Some(Account {
            username: username.to_string(),
            password: password.to_string(),
            machines,
        })
    }
}

// 中转续期请求
#[derive(Debug, Clone, Serialize)]
pub struct RelayRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub port: &'a MachineId,
}

// 登录请求
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub math_captcha: i64,
}

// FreeCloud 接口的通用响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreeCloudResponse {
    pub success: Option<bool>,
    pub message: Option<String>,
}

impl FreeCloudResponse {
    /// 非 JSON 响应按空对象处理, 字段类型不符时逐个忽略
    pub fn from_body(body: &str) -> Self {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(_) => return Self::default(),
        };

        Self {
            success: value.get("success").and_then(Value::as_bool),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn signals_failure(&self) -> bool {
        self.success == Some(false)
    }
}

/// 单台机器的续期结果
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Renewed { message: String },
    Rejected { message: String },
    Failed { error: String },
}

impl RenewalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RenewalOutcome::Renewed { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            RenewalOutcome::Renewed { message } | RenewalOutcome::Rejected { message } => message,
            RenewalOutcome::Failed { error } => error,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalReport {
    pub username: String,
    pub machine: MachineId,
    pub outcome: RenewalOutcome,
    pub attempts: u32,
}

/// 一次完整运行的汇总
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<RenewalReport>,
}

impl RunSummary {
    pub fn renewed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Renewed { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Rejected { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&RenewalOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}
