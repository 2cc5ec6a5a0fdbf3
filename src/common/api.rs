use crate::common::{AppError, ExchangeInfo, Result, SymbolCatalog};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// 计价资产
pub const QUOTE_ASSET: &str = "USDT";

/// 币安REST客户端，只负责拉取现货与合约的品种目录
#[derive(Clone, Debug)]
pub struct BinanceApi {
    spot_api_url: String,
    futures_api_url: String,
    client: Client,
}

impl BinanceApi {
    /// 创建新的API客户端实例
    pub fn new(spot_api_url: String, futures_api_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))?;
        info!(target: "api", spot = %spot_api_url, futures = %futures_api_url, "初始化币安API客户端");
        Ok(Self { spot_api_url, futures_api_url, client })
    }

    /// 获取交易所信息
    #[instrument(target = "api", skip(self), err)]
    async fn get_exchange_info(&self, url: &str) -> Result<ExchangeInfo> {
        debug!(target: "api", "发送获取交易所信息请求: {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            let api_error = AppError::ApiError(format!("获取交易所信息失败: {} - {}", status, text));
            error!(
                target: "api",
                status = %status,
                error.summary = api_error.get_error_type_summary(),
                error.details = %api_error,
                "API响应状态错误"
            );
            return Err(api_error);
        }

        let response_text = response.text().await?;
        let exchange_info: ExchangeInfo = serde_json::from_str(&response_text).map_err(|e| {
            error!(
                target: "api",
                response_preview = %response_preview(&response_text),
                "解析交易所信息JSON失败: {}", e
            );
            AppError::JsonError(e)
        })?;

        Ok(exchange_info)
    }

    /// 获取现货与合约的可交易品种目录
    ///
    /// 可重试的错误最多重试5次，不可重试的错误立即返回。
    /// 现货侧为空视为失败：不能用空目录启动过滤器。
    #[instrument(target = "api", skip(self), err)]
    pub async fn get_symbol_catalog(&self) -> Result<SymbolCatalog> {
        const MAX_RETRIES: usize = 5;
        const RETRY_INTERVAL: u64 = 1;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_catalog_once().await {
                Ok(catalog) => {
                    info!(
                        target: "api",
                        spot = catalog.spot.len(),
                        futures = catalog.futures.len(),
                        "品种目录获取成功"
                    );
                    return Ok(catalog);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    warn!(
                        target: "api",
                        attempt,
                        max_retries = MAX_RETRIES,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "获取品种目录失败，稍后重试"
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_INTERVAL)).await;
                }
                Err(e) => {
                    error!(
                        target: "api",
                        attempt,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "获取品种目录最终失败"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_catalog_once(&self) -> Result<SymbolCatalog> {
        let spot_info = self
            .get_exchange_info(&format!("{}/api/v3/exchangeInfo", self.spot_api_url))
            .await?;
        let futures_info = self
            .get_exchange_info(&format!("{}/fapi/v1/exchangeInfo", self.futures_api_url))
            .await?;

        let catalog = catalog_from_exchange_info(&spot_info, &futures_info);
        if catalog.spot.is_empty() {
            return Err(AppError::ApiError("现货品种目录为空".to_string()));
        }
        Ok(catalog)
    }
}

/// 从交易所信息构建品种目录
///
/// 现货只保留以 USDT 计价、且不是稳定币对（`USD*`、`*USDUSDT`）的交易中品种；
/// 合约保留全部交易中品种，资金费率排行依赖完整的合约列表。
pub fn catalog_from_exchange_info(spot: &ExchangeInfo, futures: &ExchangeInfo) -> SymbolCatalog {
    let spot_symbols = spot
        .symbols
        .iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| s.symbol.as_str())
        .filter(|s| is_tracked_spot_symbol(s))
        .map(str::to_string)
        .collect();

    let futures_symbols = futures
        .symbols
        .iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| s.symbol.clone())
        .collect();

    SymbolCatalog { spot: spot_symbols, futures: futures_symbols }
}

/// 日志里只保留响应体的前若干字符，按字符截断
fn response_preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 1000;
    text.chars().take(PREVIEW_CHARS).collect()
}

fn is_tracked_spot_symbol(symbol: &str) -> bool {
    symbol.ends_with(QUOTE_ASSET) && !symbol.ends_with("USDUSDT") && !symbol.starts_with("USD")
}
