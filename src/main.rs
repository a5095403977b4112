use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod models;
mod services;
mod utils;

use config::Config;
use error::AppResult;
use models::RunSummary;
use services::{
    DirectRenewer, FreeCloudClient, HttpRelayTransport, RelayRenewer, RetryPolicy,
    TelegramNotifier,
};
use utils::{mask_username, ThreadRandom, TokioSleeper};

#[derive(Parser, Debug)]
#[command(name = "freecloud-renew", version, about = "FreeCloud 免费服务器自动续期")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 直接登录面板并续期一台机器
    Direct,
    /// 通过中转服务续期多个账号下的机器
    Relay {
        /// 失败时不重试
        #[arg(long, conflicts_with = "max_retries")]
        no_retry: bool,
        /// 覆盖 RELAY_MAX_RETRIES
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("🚨 错误: {:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load().context("加载配置失败")?;

    println!("{}", "FreeCloud Renew".bright_green().bold());
    println!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Direct => run_direct(&config).await,
        Command::Relay {
            no_retry,
            max_retries,
        } => {
            let retry = if no_retry {
                RetryPolicy::no_retry()
            } else {
                RetryPolicy {
                    max_retries: max_retries.unwrap_or(config.relay.max_retries),
                    retry_delay: Duration::from_millis(config.relay.retry_delay_ms),
                }
            };
            run_relay(&config, retry).await
        }
    }
}

async fn run_direct(config: &Config) -> Result<ExitCode> {
    let target = config.direct_target()?;
    println!("Mode: direct ({} -> port {})", config.freecloud.base_url, target.port);

    let client = FreeCloudClient::new(&config.freecloud.base_url, config.http_timeout)?;
    let renewer = DirectRenewer::new(client, Box::new(notifier(config)?));

    // 失败已在 DirectRenewer 中记录并通知
    Ok(direct_exit_code(&renewer.run(&target).await))
}

async fn run_relay(config: &Config, retry: RetryPolicy) -> Result<ExitCode> {
    let accounts = config.relay_accounts()?;
    let endpoints = config.relay_endpoints()?.to_vec();
    let throttle = config.relay_throttle()?;
    println!(
        "Mode: relay ({} accounts, {} endpoints, {} retries)",
        accounts.len(),
        endpoints.len(),
        retry.max_retries
    );

    if accounts.is_empty() {
        warn!("⚠️ 没有可用的账号配置");
    }

    let renewer = RelayRenewer::new(
        endpoints,
        Box::new(HttpRelayTransport::new(config.http_timeout)?),
        Box::new(notifier(config)?),
        Box::new(ThreadRandom),
        Box::new(TokioSleeper),
    )?
    .with_retry(retry)
    .with_throttle(throttle);

    let summary = renewer.run(&accounts).await;
    print_summary(&summary);

    Ok(summary_exit_code(&summary))
}

fn direct_exit_code<T>(result: &AppResult<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// 被中转服务拒绝不算失败
fn summary_exit_code(summary: &RunSummary) -> ExitCode {
    if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn notifier(config: &Config) -> Result<TelegramNotifier> {
    Ok(TelegramNotifier::new(
        config.telegram.clone(),
        config.http_timeout,
    )?)
}

fn print_summary(summary: &RunSummary) {
    for report in summary.reports.iter().filter(|r| !r.outcome.is_success()) {
        warn!(
            "{} 端口 {}: {} (尝试 {} 次)",
            mask_username(&report.username),
            report.machine,
            report.outcome.message(),
            report.attempts
        );
    }
    info!(
        "续期完成: 成功 {}, 拒绝 {}, 失败 {}",
        summary.renewed(),
        summary.rejected(),
        summary.failed()
    );
    println!(
        "{} {}  {} {}  {} {}",
        "成功".green().bold(),
        summary.renewed(),
        "拒绝".yellow().bold(),
        summary.rejected(),
        "失败".red().bold(),
        summary.failed()
    );
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "freecloud_renew=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
