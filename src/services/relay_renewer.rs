use crate::error::{AppError, AppResult};
use crate::models::{Account, MachineId, RelayRequest, RenewalOutcome, RenewalReport, RunSummary};
use crate::services::{Notifier, RelayTransport};
use crate::utils::{escape_markdown, format_timestamp, mask_username, select_random, RandomSource, Sleeper};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

/// 中转服务返回这些信息时说明请求本身有问题, 重试没有意义
pub const NON_RETRYABLE_MESSAGES: &[&str] =
    &["request body not valid JSON", "missing username/password/port"];

const MISSING_MESSAGE: &str = "无返回信息";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次请求之外的最大重试次数
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// 相邻两台机器之间的随机间隔
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            max_delay_ms: 2000,
        }
    }
}

pub struct RelayRenewer {
    endpoints: Vec<String>,
    transport: Box<dyn RelayTransport>,
    notifier: Box<dyn Notifier>,
    random: Box<dyn RandomSource>,
    sleeper: Box<dyn Sleeper>,
    retry: RetryPolicy,
    throttle: ThrottlePolicy,
}

impl RelayRenewer {
    pub fn new(
        endpoints: Vec<String>,
        transport: Box<dyn RelayTransport>,
        notifier: Box<dyn Notifier>,
        random: Box<dyn RandomSource>,
        sleeper: Box<dyn Sleeper>,
    ) -> AppResult<Self> {
        if endpoints.is_empty() {
            return Err(AppError::Configuration(
                "at least one relay endpoint is required".to_string(),
            ));
        }

        Ok(Self {
            endpoints,
            transport,
            notifier,
            random,
            sleeper,
            retry: RetryPolicy::default(),
            throttle: ThrottlePolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    /// 依次处理所有账号下的所有机器
    pub async fn run(&self, accounts: &[Account]) -> RunSummary {
        let mut summary = RunSummary::default();

        for account in accounts {
            if account.machines.is_empty() {
                warn!("⚠️ 账号 {} 没有配置机器, 跳过", mask_username(&account.username));
                continue;
            }

            info!(
                "处理账号 {} ({} 台机器)",
                mask_username(&account.username),
                account.machines.len()
            );

            for machine in &account.machines {
                if !summary.reports.is_empty() {
                    self.throttle().await;
                }
                let report = self.renew_machine(account, machine).await;
                summary.reports.push(report);
            }
        }

        self.notifier.notify(&format_summary(&summary)).await;
        summary
    }

    /// 续期单台机器, 临时错误按 RetryPolicy 重试
    pub async fn renew_machine(&self, account: &Account, machine: &MachineId) -> RenewalReport {
        let total_attempts = self.retry.max_retries.saturating_add(1);
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;

            match self.attempt(account, machine).await {
                Ok(message) => {
                    info!("✅ {} 端口 {}: {}", mask_username(&account.username), machine, message);
                    break RenewalOutcome::Renewed { message };
                }
                Err(AppError::SignaledFailure(message)) => {
                    error!("❌ {} 端口 {}: {}", mask_username(&account.username), machine, message);
                    break RenewalOutcome::Rejected { message };
                }
                Err(e) => {
                    error!(
                        "🚨 {} 端口 {} 第 {}/{} 次请求失败: {}",
                        mask_username(&account.username),
                        machine,
                        attempt,
                        total_attempts,
                        e
                    );
                    self.notifier
                        .notify(&format_failure(&account.username, machine, attempt, total_attempts, &e))
                        .await;

                    if !e.is_retryable() || attempt >= total_attempts {
                        break RenewalOutcome::Failed {
                            error: e.to_string(),
                        };
                    }

                    warn!("{:?} 后重试", self.retry.retry_delay);
                    self.sleeper.sleep(self.retry.retry_delay).await;
                }
            }
        };

        RenewalReport {
            username: account.username.clone(),
            machine: machine.clone(),
            outcome,
            attempts: attempt,
        }
    }

    /// 单次请求, 成功时返回中转服务的 message
    async fn attempt(&self, account: &Account, machine: &MachineId) -> AppResult<String> {
        let endpoint = select_random(&self.endpoints, &*self.random).ok_or_else(|| {
            AppError::Configuration("at least one relay endpoint is required".to_string())
        })?;

        let request = RelayRequest {
            username: &account.username,
            password: &account.password,
            port: machine,
        };

        let body = self.transport.post(endpoint, &request).await?;
        let value: Value = serde_json::from_str(&body)?;

        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(MISSING_MESSAGE)
            .to_string();

        self.notifier
            .notify(&format_result(&account.username, machine, &message))
            .await;

        if is_non_retryable(&message) {
            return Err(AppError::SignaledFailure(message));
        }
        Ok(message)
    }

    async fn throttle(&self) {
        let delay = self
            .random
            .delay_ms(self.throttle.min_delay_ms, self.throttle.max_delay_ms);
        self.sleeper.sleep(Duration::from_millis(delay)).await;
    }
}

pub fn is_non_retryable(message: &str) -> bool {
    NON_RETRYABLE_MESSAGES
        .iter()
        .any(|pattern| message.contains(pattern))
}

fn format_result(username: &str, machine: &MachineId, message: &str) -> String {
    format!(
        "🖥️ *FreeCloud 续期结果*\n账号: {}\n端口: {}\n结果: {}",
        escape_markdown(username),
        escape_markdown(&machine.to_string()),
        escape_markdown(message)
    )
}

fn format_failure(
    username: &str,
    machine: &MachineId,
    attempt: u32,
    total: u32,
    error: &AppError,
) -> String {
    format!(
        "🚨 *FreeCloud 续期请求失败* ({}/{})\n账号: {}\n端口: {}\n错误: {}",
        attempt,
        total,
        escape_markdown(username),
        escape_markdown(&machine.to_string()),
        escape_markdown(&error.to_string())
    )
}

fn format_summary(summary: &RunSummary) -> String {
    format!(
        "📋 *FreeCloud 续期汇总* ({})\n成功: {}\n拒绝: {}\n失败: {}",
        format_timestamp(chrono::Local::now()),
        summary.renewed(),
        summary.rejected(),
        summary.failed()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    type Script = Arc<Mutex<VecDeque<AppResult<String>>>>;

    /// 按顺序返回预设响应, 同时记录请求
    struct ScriptedTransport {
        script: Script,
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    #[async_trait]
    impl RelayTransport for ScriptedTransport {
        async fn post(&self, endpoint: &str, request: &RelayRequest<'_>) -> AppResult<String> {
            self.calls
                .lock()
                .push((endpoint.to_string(), serde_json::to_value(request).unwrap()));
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Transient("script exhausted".to_string())))
        }
    }

    #[derive(Clone, Default)]
    struct CapturingNotifier(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn notify(&self, text: &str) {
            self.0.lock().push(text.to_string());
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().push(duration);
        }
    }

    /// 依次轮换下标, 延迟取中间值
    struct RoundRobin(Mutex<usize>);

    impl RandomSource for RoundRobin {
        fn pick_index(&self, len: usize) -> usize {
            let mut next = self.0.lock();
            let index = *next % len;
            *next += 1;
            index
        }

        fn delay_ms(&self, min: u64, max: u64) -> u64 {
            (min + max) / 2
        }
    }

    struct Harness {
        renewer: RelayRenewer,
        calls: Arc<Mutex<Vec<(String, Value)>>>,
        notifications: CapturingNotifier,
        sleeps: RecordingSleeper,
    }

    fn harness(responses: Vec<AppResult<String>>, retry: RetryPolicy) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let notifications = CapturingNotifier::default();
        let sleeps = RecordingSleeper::default();

        let transport = ScriptedTransport {
            script: Arc::new(Mutex::new(responses.into_iter().collect())),
            calls: calls.clone(),
        };

        let renewer = RelayRenewer::new(
            vec!["https://r1.example/renew".to_string(), "https://r2.example/renew".to_string()],
            Box::new(transport),
            Box::new(notifications.clone()),
            Box::new(RoundRobin(Mutex::new(0))),
            Box::new(sleeps.clone()),
        )
        .unwrap()
        .with_retry(retry);

        Harness {
            renewer,
            calls,
            notifications,
            sleeps,
        }
    }

    fn account(machines: Vec<u64>) -> Account {
        Account {
            username: "a@x.com".to_string(),
            password: "p".to_string(),
            machines: machines.into_iter().map(MachineId::from).collect(),
        }
    }

    fn ok(body: &str) -> AppResult<String> {
        Ok(body.to_string())
    }

    fn network_error() -> AppResult<String> {
        Err(AppError::Transient("connection reset".to_string()))
    }

    #[test]
    fn test_non_retryable_messages() {
        assert!(is_non_retryable("missing username/password/port"));
        assert!(is_non_retryable("error: request body not valid JSON"));
        assert!(!is_non_retryable("renewed"));
    }

    #[test]
    fn test_requires_endpoints() {
        let result = RelayRenewer::new(
            Vec::new(),
            Box::new(ScriptedTransport {
                script: Arc::new(Mutex::new(VecDeque::new())),
                calls: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(CapturingNotifier::default()),
            Box::new(RoundRobin(Mutex::new(0))),
            Box::new(RecordingSleeper::default()),
        );
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_renewed_on_first_attempt() {
        let h = harness(vec![ok(r#"{"message":"renewed"}"#)], RetryPolicy::default());
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert_eq!(report.outcome, RenewalOutcome::Renewed { message: "renewed".to_string() });
        assert_eq!(report.attempts, 1);
        let calls = h.calls.lock();
        assert_eq!(calls[0].0, "https://r1.example/renew");
        assert_eq!(
            calls[0].1,
            serde_json::json!({"username": "a@x.com", "password": "p", "port": 100})
        );
        assert!(h.sleeps.0.lock().is_empty());
        assert_eq!(h.notifications.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_signaled_failure_is_not_retried() {
        let h = harness(
            vec![ok(r#"{"message":"missing username/password/port"}"#)],
            RetryPolicy::default(),
        );
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert!(!report.outcome.is_success());
        assert_eq!(
            report.outcome,
            RenewalOutcome::Rejected { message: "missing username/password/port".to_string() }
        );
        assert_eq!(report.attempts, 1);
        assert_eq!(h.calls.lock().len(), 1);
        assert!(h.sleeps.0.lock().is_empty());
        let notifications = h.notifications.0.lock();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].contains("missing username/password/port"));
    }

    #[tokio::test]
    async fn test_malformed_json_retried_three_times_total() {
        let h = harness(
            vec![ok("<html>502</html>"), ok("not json"), ok("")],
            RetryPolicy::default(),
        );
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert!(matches!(report.outcome, RenewalOutcome::Failed { .. }));
        assert_eq!(report.attempts, 3);
        assert_eq!(h.calls.lock().len(), 3);
        assert_eq!(
            *h.sleeps.0.lock(),
            vec![Duration::from_millis(2000), Duration::from_millis(2000)]
        );
        // 每次失败都通知
        assert_eq!(h.notifications.0.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_network_errors_then_success() {
        let h = harness(
            vec![network_error(), network_error(), ok(r#"{"message":"renewed"}"#)],
            RetryPolicy::default(),
        );
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.outcome.message(), "renewed");
        assert_eq!(report.attempts, 3);
        assert_eq!(
            *h.sleeps.0.lock(),
            vec![Duration::from_millis(2000), Duration::from_millis(2000)]
        );
        // 随机源轮换, 重试可能换到另一个中转
        let endpoints: Vec<String> = h.calls.lock().iter().map(|(e, _)| e.clone()).collect();
        assert_eq!(
            endpoints,
            vec![
                "https://r1.example/renew",
                "https://r2.example/renew",
                "https://r1.example/renew"
            ]
        );
    }

    #[tokio::test]
    async fn test_no_retry_variant() {
        let h = harness(vec![network_error()], RetryPolicy::no_retry());
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert!(matches!(report.outcome, RenewalOutcome::Failed { .. }));
        assert_eq!(report.attempts, 1);
        assert!(h.sleeps.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_retry_setting_does_not_overflow() {
        let retry = RetryPolicy {
            max_retries: u32::MAX,
            retry_delay: Duration::from_millis(5),
        };
        let h = harness(vec![network_error(), ok(r#"{"message":"renewed"}"#)], retry);
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.attempts, 2);
        assert_eq!(*h.sleeps.0.lock(), vec![Duration::from_millis(5)]);
    }

    #[tokio::test]
    async fn test_missing_message_uses_placeholder() {
        let h = harness(vec![ok(r#"{"status":"done"}"#)], RetryPolicy::default());
        let account = account(vec![100]);

        let report = h.renewer.renew_machine(&account, &account.machines[0]).await;

        assert_eq!(report.outcome, RenewalOutcome::Renewed { message: MISSING_MESSAGE.to_string() });
    }

    #[tokio::test]
    async fn test_run_throttles_between_machines_and_continues_after_failure() {
        let h = harness(
            vec![
                ok(r#"{"message":"missing username/password/port"}"#),
                ok(r#"{"message":"renewed"}"#),
                ok(r#"{"message":"renewed"}"#),
            ],
            RetryPolicy::no_retry(),
        );
        let accounts = vec![account(vec![100, 101]), account(vec![]), account(vec![200])];

        let summary = h.renewer.run(&accounts).await;

        assert_eq!(summary.reports.len(), 3);
        assert_eq!(summary.rejected(), 1);
        assert_eq!(summary.renewed(), 2);
        assert!(!summary.has_failures());
        // 三台机器之间两次随机间隔
        assert_eq!(
            *h.sleeps.0.lock(),
            vec![Duration::from_millis(1500), Duration::from_millis(1500)]
        );
        let notifications = h.notifications.0.lock();
        assert_eq!(notifications.len(), 4);
        assert!(notifications[3].contains("续期汇总"));
    }
}
