//! 告警过滤服务配置模块

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use crate::common::{AppError, Result};

/// 系统配置常量
pub mod constants {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "config/MarketFilterConfig.toml";

    /// 每个品种保留的行情快照数（1Hz 下约一小时）
    pub const DEFAULT_HISTORY_CAPACITY: usize = 60 * 60;

    /// 窗口上限（分钟）
    pub const MAX_WINDOW_MINUTES: f64 = 60.0;

    pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;
}

use constants::*;

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_excluded_futures_prefixes() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

fn default_streams_per_connection() -> usize {
    200
}

fn default_enable_console_output() -> bool {
    true
}

fn default_time_zone() -> String {
    "Asia/Shanghai".to_string()
}

fn default_command_source() -> String {
    "stdin".to_string()
}

fn default_universe_refresh_interval_secs() -> u64 {
    6 * 60 * 60
}

/// 告警过滤服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// 初始阈值（运行期可通过 set 指令热更新）
    pub thresholds: ThresholdConfig,

    /// 行情历史配置
    #[serde(default)]
    pub history: HistoryConfig,

    /// 交易所端点配置
    pub exchange: ExchangeConfig,

    /// 告警投递配置
    pub notification: NotificationConfig,

    /// 日志配置
    pub logging: LoggingConfig,

    /// 告警文本的显示配置
    #[serde(default)]
    pub display: DisplayConfig,

    /// 品种目录定时刷新间隔（秒），0 表示只在运维指令触发时刷新
    #[serde(default = "default_universe_refresh_interval_secs")]
    pub universe_refresh_interval_secs: u64,
}

/// 阈值配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// 现货单笔成交占24h成交量百分比
    pub spot_rate_pct: f64,
    /// 合约单笔成交占24h成交量百分比
    pub futures_rate_pct: f64,
    /// 现货大单金额（USDT）
    pub spot_large_trade_usd: f64,
    /// 合约大单金额（USDT）
    pub futures_large_trade_usd: f64,
    /// 24h成交额下限（USDT）
    pub min_quote_volume: f64,
    /// 24h成交额上限（USDT）
    pub max_quote_volume: f64,
    /// 滑动窗口（分钟）
    pub window_minutes: f64,
    /// 窗口内上涨百分比
    pub up_pct: f64,
    /// 窗口内下跌百分比（负数）
    pub down_pct: f64,
    /// 窗口内成交额增长百分比
    pub volume_pct: f64,
}

/// 行情历史配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// 每个品种的环形缓冲区容量
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

/// 交易所端点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// 现货 REST 端点
    pub spot_api_url: String,
    /// U本位合约 REST 端点
    pub futures_api_url: String,
    /// 现货 WebSocket 端点（不含路径）
    pub spot_ws_url: String,
    /// 合约 WebSocket 端点（不含路径）
    pub futures_ws_url: String,
    /// 单条组合流连接承载的流数量
    #[serde(default = "default_streams_per_connection")]
    pub streams_per_connection: usize,
    /// 合约大单过滤时忽略的品种前缀
    #[serde(default = "default_excluded_futures_prefixes")]
    pub excluded_futures_prefixes: Vec<String>,
}

/// 告警投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// 投递方式 (telegram, log)
    pub sink: String,
    /// Telegram Bot API 端点
    pub telegram_api_url: String,
    /// 运维指令来源 (stdin, telegram)
    #[serde(default = "default_command_source")]
    pub command_source: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,

    /// 日志文件目录
    pub log_dir: String,

    /// 日志文件名前缀（按天滚动）
    pub file_prefix: String,

    /// 是否启用控制台输出
    #[serde(default = "default_enable_console_output")]
    pub enable_console_output: bool,
}

/// 显示配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// 告警时间显示所用的 IANA 时区名，如 `Asia/Shanghai`
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            spot_rate_pct: 5.0,
            futures_rate_pct: 10.0,
            spot_large_trade_usd: 1_000_000.0,
            futures_large_trade_usd: 2_000_000.0,
            min_quote_volume: 10_000_000.0,
            max_quote_volume: 500_000_000.0,
            window_minutes: 2.0,
            up_pct: 2.0,
            down_pct: -5.0,
            volume_pct: 2.0,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            spot_api_url: "https://api.binance.com".to_string(),
            futures_api_url: "https://fapi.binance.com".to_string(),
            spot_ws_url: "wss://stream.binance.com:9443".to_string(),
            futures_ws_url: "wss://fstream.binance.com".to_string(),
            streams_per_connection: default_streams_per_connection(),
            excluded_futures_prefixes: default_excluded_futures_prefixes(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            sink: "log".to_string(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            command_source: default_command_source(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            file_prefix: "market_filter.log".to_string(),
            enable_console_output: true,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            history: HistoryConfig::default(),
            exchange: ExchangeConfig::default(),
            notification: NotificationConfig::default(),
            logging: LoggingConfig::default(),
            display: DisplayConfig::default(),
            universe_refresh_interval_secs: default_universe_refresh_interval_secs(),
        }
    }
}

impl FilterConfig {
    /// 从文件加载配置
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("解析配置文件失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// 验证配置的有效性
    ///
    /// 阈值的取值域与运行期 set 指令一致
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let positive = [
            ("spot_rate_pct", t.spot_rate_pct),
            ("futures_rate_pct", t.futures_rate_pct),
            ("spot_large_trade_usd", t.spot_large_trade_usd),
            ("futures_large_trade_usd", t.futures_large_trade_usd),
            ("min_quote_volume", t.min_quote_volume),
            ("max_quote_volume", t.max_quote_volume),
            ("up_pct", t.up_pct),
            ("volume_pct", t.volume_pct),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(AppError::ConfigError(format!("阈值 {} 必须大于0", name)));
            }
        }

        if !(t.down_pct < 0.0) {
            return Err(AppError::ConfigError("阈值 down_pct 必须小于0".to_string()));
        }

        // 换算成毫秒后不能为0
        if !(t.window_minutes * MILLIS_PER_MINUTE as f64 >= 1.0 && t.window_minutes <= MAX_WINDOW_MINUTES) {
            return Err(AppError::ConfigError(format!(
                "窗口必须在 (0, {}] 分钟之间", MAX_WINDOW_MINUTES
            )));
        }

        if t.min_quote_volume > t.max_quote_volume {
            return Err(AppError::ConfigError(
                "min_quote_volume 不能大于 max_quote_volume".to_string()
            ));
        }

        if self.history.capacity == 0 {
            return Err(AppError::ConfigError("历史容量必须大于0".to_string()));
        }

        if self.exchange.streams_per_connection == 0 {
            return Err(AppError::ConfigError("单连接流数量必须大于0".to_string()));
        }

        match self.notification.sink.as_str() {
            "telegram" | "log" => {}
            other => {
                return Err(AppError::ConfigError(format!("不支持的投递方式: {}", other)));
            }
        }

        match self.notification.command_source.as_str() {
            "stdin" | "telegram" => {}
            other => {
                return Err(AppError::ConfigError(format!("不支持的指令来源: {}", other)));
            }
        }

        self.display_time_zone()?;

        Ok(())
    }

    /// 解析显示时区
    pub fn display_time_zone(&self) -> Result<Tz> {
        self.display
            .time_zone
            .parse::<Tz>()
            .map_err(|_| AppError::ConfigError(format!("无效的时区: {}", self.display.time_zone)))
    }
}
