use async_trait::async_trait;
use chrono::{DateTime, Local};
use rand::{thread_rng, Rng};
use std::time::Duration;

/// 随机源, 测试中可替换为固定序列
pub trait RandomSource: Send + Sync {
    /// 返回 [0, len) 内的下标, len 必须大于 0
    fn pick_index(&self, len: usize) -> usize;

    /// 返回 [min, max] 内的毫秒数
    fn delay_ms(&self, min: u64, max: u64) -> u64;
}

pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick_index(&self, len: usize) -> usize {
        thread_rng().gen_range(0..len)
    }

    fn delay_ms(&self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        thread_rng().gen_range(min..=max)
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 随机选择一个元素
pub fn select_random<'a, T>(items: &'a [T], random: &dyn RandomSource) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(random.pick_index(items.len()))
}

/// 分割逗号分隔的列表
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 日志中隐藏用户名中间部分
pub fn mask_username(username: &str) -> String {
    let (local, domain) = match username.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (username, None),
    };

    let visible: String = local.chars().take(2).collect();
    let masked = if local.chars().count() > 2 {
        format!("{}***", visible)
    } else {
        format!("{}*", visible)
    };

    match domain {
        Some(domain) => format!("{}@{}", masked, domain),
        None => masked,
    }
}

/// 转义 Telegram Markdown(旧版) 的特殊字符
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// 格式化时间
pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}
