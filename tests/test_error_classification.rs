//! 测试错误分类系统
//!
//! 验证AppError的get_error_type_summary()与is_retryable()

use market_filter::AppError;

#[test]
fn test_catalog_error_classification() {
    let error = AppError::ApiError("连接超时".to_string());
    assert_eq!(error.get_error_type_summary(), "symbol_catalog_acquisition_failed");
    assert!(error.is_retryable());
}

#[test]
fn test_json_error_classification() {
    let json_error = serde_json::from_str::<serde_json::Value>("{invalid_json").unwrap_err();
    let error = AppError::JsonError(json_error);
    assert_eq!(error.get_error_type_summary(), "market_event_parsing_failed");
    assert!(!error.is_retryable()); // 解析错误不应重试
}

#[test]
fn test_feed_error_classification() {
    let error = AppError::WebSocketError("连接断开".to_string());
    assert_eq!(error.get_error_type_summary(), "realtime_market_feed_failed");
    assert!(error.is_retryable());

    let error = AppError::FeedTerminated("ticker 行情流已结束".to_string());
    assert_eq!(error.get_error_type_summary(), "market_feed_terminated");
    assert!(error.is_retryable());
}

#[test]
fn test_notify_error_classification() {
    let error = AppError::NotifyError("Telegram 返回 502".to_string());
    assert_eq!(error.get_error_type_summary(), "alert_delivery_failed");
    assert!(error.is_retryable());
}

#[test]
fn test_config_error_classification() {
    let error = AppError::ConfigError("配置文件格式错误".to_string());
    assert_eq!(error.get_error_type_summary(), "filter_configuration_invalid");
    assert!(!error.is_retryable()); // 配置错误不应重试
}

#[test]
fn test_startup_error_classification() {
    let error = AppError::InitializationError("初始品种目录为空".to_string());
    assert_eq!(error.get_error_type_summary(), "filter_startup_failed");
    assert!(!error.is_retryable());
}

#[test]
fn test_url_error_classification() {
    let url_error = url::Url::parse("not a url").unwrap_err();
    let error = AppError::UrlParseError(url_error);
    assert_eq!(error.get_error_type_summary(), "market_endpoint_invalid");
    assert!(!error.is_retryable());
}

#[test]
fn test_error_display() {
    let error = AppError::WebSocketError("ticker 超过 60 秒未收到任何数据，已超时".to_string());
    assert_eq!(error.to_string(), "WebSocket error: ticker 超过 60 秒未收到任何数据，已超时");
}
