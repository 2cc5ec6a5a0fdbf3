//! 统一日志系统初始化模块
//!
//! 控制台输出与按天滚动的文件日志共用同一个过滤器，
//! 文件写入走 tracing-appender 的非阻塞通道，guard 由 main 持有。

use crate::common::{config::LoggingConfig, AppError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 初始化日志系统
///
/// 日志级别优先取 `RUST_LOG`，否则使用配置文件中的 `log_level`。
/// 返回的 guard 被丢弃时会刷新尚未写盘的文件日志。
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)?;

    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!("{},hyper=warn,reqwest=warn,tungstenite=warn", config.log_level)
    });
    let make_filter = || {
        EnvFilter::try_new(&filter_str)
            .map_err(|e| AppError::ConfigError(format!("无效的日志过滤器 {}: {}", filter_str, e)))
    };

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(make_filter()?);

    let console_layer = if config.enable_console_output {
        Some(fmt::layer().with_target(true).with_filter(make_filter()?))
    } else {
        None
    };

    Registry::default()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| AppError::InitializationError(format!("日志系统初始化失败: {}", e)))?;

    Ok(guard)
}
