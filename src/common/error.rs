use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("WebSocket protocol error: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL parsing error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Feed terminated: {0}")]
    FeedTerminated(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl AppError {
    /// 获取错误类型的简洁摘要，用于结构化日志中的错误分类
    ///
    /// 返回稳定的业务类别字符串，便于按类别聚合告警服务的故障
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // 交易所数据获取
            AppError::ApiError(_) => "symbol_catalog_acquisition_failed",
            AppError::HttpError(_) => "exchange_connection_failed",

            // 行情数据解析
            AppError::JsonError(_) => "market_event_parsing_failed",

            // 实时行情流
            AppError::WebSocketError(_) => "realtime_market_feed_failed",
            AppError::WebSocketProtocolError(_) => "market_feed_protocol_failed",
            AppError::UrlParseError(_) => "market_endpoint_invalid",
            AppError::FeedTerminated(_) => "market_feed_terminated",

            // 告警投递
            AppError::NotifyError(_) => "alert_delivery_failed",

            // 系统资源
            AppError::IoError(_) => "filter_file_operation_failed",

            // 配置与启动
            AppError::ConfigError(_) => "filter_configuration_invalid",
            AppError::InitializationError(_) => "filter_startup_failed",
        }
    }

    /// 检查错误是否为可重试类型
    ///
    /// 品种目录拉取失败时据此决定是否重试
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络相关错误通常可重试
            AppError::HttpError(_) |
            AppError::ApiError(_) |
            AppError::WebSocketError(_) |
            AppError::WebSocketProtocolError(_) |
            AppError::FeedTerminated(_) => true,

            // 临时性系统资源错误可重试
            AppError::IoError(_) |
            AppError::NotifyError(_) => true,

            // 解析错误、配置错误等不可重试
            AppError::JsonError(_) |
            AppError::ConfigError(_) |
            AppError::UrlParseError(_) |
            AppError::InitializationError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
