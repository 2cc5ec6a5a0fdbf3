//! 实时行情过滤服务
//!
//! ## 运行流程
//! 1. 加载配置并初始化日志，日志 guard 持有到进程退出。
//! 2. 拉取品种目录构建过滤引擎，拿不到目录直接退出。
//! 3. 启动四类行情任务，后台任务负责定时刷新目录和拉起意外退出的行情。
//! 4. 主任务读取运维指令（标准输入逐行，或 Telegram 会话里的 `/指令`），
//!    `Ctrl-C` 或标准输入结束时停止所有行情。

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use market_filter::common::config::constants::DEFAULT_CONFIG_PATH;
use market_filter::common::logging_setup::init_logging;
use market_filter::common::{spawn_instrumented, FilterConfig};
use market_filter::filter::{BinanceMarketFeed, MarketFilter, NotificationSink};
use market_filter::notify::{LogSink, TelegramCommandSource, TelegramSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, info_span, warn, Instrument};

const APP_TARGET: &str = "应用生命周期";

/// 检查行情任务存活的间隔
const FEED_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// 拉取 Telegram 指令失败后的等待时间
const COMMAND_POLL_RETRY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "market_filter", about = "币安实时行情异动与大单告警")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// 忽略配置中的投递方式，告警只写日志
    #[arg(long)]
    log_only: bool,

    /// 告警时间的显示时区（IANA 名称），覆盖配置
    #[arg(long, env = "LOCATION_TIME")]
    time_zone: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = FilterConfig::from_file(&cli.config)
        .with_context(|| format!("加载配置文件失败: {}", cli.config))?;
    if let Some(zone) = cli.time_zone.filter(|z| !z.is_empty()) {
        config.display.time_zone = zone;
        config.validate().context("显示时区无效")?;
    }
    let _guard = init_logging(&config.logging).context("初始化日志失败")?;

    info!(target: APP_TARGET, config = %cli.config, "告警过滤服务启动");

    let sink: Arc<dyn NotificationSink> = if cli.log_only || config.notification.sink == "log" {
        Arc::new(LogSink)
    } else {
        Arc::new(TelegramSink::from_env(&config.notification.telegram_api_url)?)
    };
    let commands = if config.notification.command_source == "telegram" {
        Some(TelegramCommandSource::from_env(&config.notification.telegram_api_url)?)
    } else {
        None
    };
    let feed = Arc::new(BinanceMarketFeed::new(&config.exchange)?);

    let filter = match MarketFilter::new(&config, feed, sink).await {
        Ok(filter) => Arc::new(filter),
        Err(e) => {
            error!(
                target: APP_TARGET,
                { error.summary = e.get_error_type_summary(),
                error.details = %e },
                "过滤引擎初始化失败，退出"
            );
            return Err(e.into());
        }
    };

    filter.announce_started(Utc::now());
    if let Err(e) = filter.start_feeds().await {
        warn!(
            target: APP_TARGET,
            { error.summary = e.get_error_type_summary(),
            error.details = %e },
            "部分行情启动失败，由存活检查重试"
        );
    }

    if config.universe_refresh_interval_secs > 0 {
        let interval = Duration::from_secs(config.universe_refresh_interval_secs);
        spawn_instrumented(
            refresh_universe_loop(filter.clone(), interval).instrument(info_span!("universe_refresh")),
        );
    }
    spawn_instrumented(watch_feeds_loop(filter.clone()).instrument(info_span!("feed_watch")));

    match commands {
        Some(source) => {
            info!(target: APP_TARGET, "运维指令来源: Telegram");
            tokio::select! {
                _ = poll_telegram_commands(filter.clone(), source) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(target: APP_TARGET, "收到 Ctrl-C");
                }
            }
        }
        None => {
            tokio::select! {
                _ = read_commands(filter.clone()) => {
                    info!(target: APP_TARGET, "标准输入已关闭");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(target: APP_TARGET, "收到 Ctrl-C");
                }
            }
        }
    }

    filter.stop_feeds().await;
    info!(target: APP_TARGET, "告警过滤服务已退出");
    Ok(())
}

/// 定时刷新品种目录；品种有增减时重启行情以重新订阅成交流
async fn refresh_universe_loop(filter: Arc<MarketFilter>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // 第一次 tick 立即返回，启动时已经拉过目录
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match filter.refresh_universe().await {
            Ok(report) if !report.added.is_empty() || !report.removed.is_empty() => {
                info!(
                    target: APP_TARGET,
                    added = ?report.added,
                    removed = ?report.removed,
                    "品种有变化，重启行情"
                );
                if let Err(e) = filter.restart_feeds().await {
                    error!(
                        target: APP_TARGET,
                        { error.summary = e.get_error_type_summary(),
                        error.details = %e },
                        "刷新后重启行情失败，由存活检查重试"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!(
                target: APP_TARGET,
                { error.summary = e.get_error_type_summary(),
                error.details = %e },
                "定时刷新品种目录失败，保留当前目录"
            ),
        }
    }
}

async fn watch_feeds_loop(filter: Arc<MarketFilter>) {
    let mut ticker = tokio::time::interval(FEED_WATCH_INTERVAL);
    loop {
        ticker.tick().await;
        let restarted = filter.restart_terminated_feeds().await;
        if !restarted.is_empty() {
            warn!(target: APP_TARGET, feeds = ?restarted, "已重启意外退出的行情");
        }
    }
}

/// 逐行读取运维指令，格式为 `指令 [参数...]`
async fn read_commands(filter: Arc<MarketFilter>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (name, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
                let reply = filter.handle_command(name, args.trim()).await;
                info!(target: APP_TARGET, command = name, reply = %reply, "运维指令已处理");
            }
            Ok(None) => return,
            Err(e) => {
                error!(target: APP_TARGET, error = %e, "读取标准输入失败");
                return;
            }
        }
    }
}

/// 长轮询 Telegram 会话里的运维指令，拉取失败时等待后重试
async fn poll_telegram_commands(filter: Arc<MarketFilter>, mut source: TelegramCommandSource) {
    loop {
        match source.next_commands().await {
            Ok(commands) => {
                for command in commands {
                    let reply = filter.handle_command(&command.name, &command.args).await;
                    info!(target: APP_TARGET, command = %command.name, reply = %reply, "运维指令已处理");
                }
            }
            Err(e) => {
                warn!(
                    target: APP_TARGET,
                    { error.summary = e.get_error_type_summary(),
                    error.details = %e },
                    "拉取 Telegram 指令失败"
                );
                tokio::time::sleep(COMMAND_POLL_RETRY).await;
            }
        }
    }
}
