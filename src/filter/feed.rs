//! 行情源
//!
//! `MarketFeed` 把交易所连接层和过滤引擎隔开：引擎只拿到已经解析好的事件流。
//! 流里出现 `Err` 或流结束都视为该行情的致命错误，由行情任务上报。

use super::universe::FUNDING_REFRESH_INTERVAL;
use crate::common::api::BinanceApi;
use crate::common::config::ExchangeConfig;
use crate::common::websocket::{chunked_stream_urls, single_stream_url, spawn_stream_reader};
use crate::common::{CombinedStreamPayload, MarkPriceEvent, Result, SymbolCatalog, TickerEvent, TradeEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// 行情事件接收端
pub type FeedReceiver<T> = mpsc::Receiver<Result<T>>;

/// 单条行情流的缓冲深度
const FEED_CHANNEL_CAPACITY: usize = 4096;

const FEED_TARGET: &str = "行情源";

#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// 当前可交易的现货与合约品种
    async fn catalog(&self) -> Result<SymbolCatalog>;

    /// 全市场 Ticker，每条消息是一批品种
    async fn ticker_stream(&self) -> Result<FeedReceiver<Vec<TickerEvent>>>;

    async fn spot_trade_stream(&self, symbols: Vec<String>) -> Result<FeedReceiver<TradeEvent>>;

    async fn futures_trade_stream(&self, symbols: Vec<String>) -> Result<FeedReceiver<TradeEvent>>;

    async fn mark_price_stream(&self, symbols: Vec<String>) -> Result<FeedReceiver<MarkPriceEvent>>;
}

/// 标记价格流名：1秒档用 `markPrice@1s`，否则用默认的3秒档
pub fn mark_price_stream_suffix(interval: Duration) -> &'static str {
    if interval <= Duration::from_secs(1) {
        "markPrice@1s"
    } else {
        "markPrice"
    }
}

/// 币安 WebSocket 行情源
#[derive(Debug, Clone)]
pub struct BinanceMarketFeed {
    api: BinanceApi,
    spot_ws_url: String,
    futures_ws_url: String,
    streams_per_connection: usize,
}

impl BinanceMarketFeed {
    pub fn new(exchange: &ExchangeConfig) -> Result<Self> {
        let api = BinanceApi::new(exchange.spot_api_url.clone(), exchange.futures_api_url.clone())?;
        Ok(Self {
            api,
            spot_ws_url: exchange.spot_ws_url.clone(),
            futures_ws_url: exchange.futures_ws_url.clone(),
            streams_per_connection: exchange.streams_per_connection,
        })
    }

    /// 按组合流切分品种，每条连接一个读取任务，共用同一个发送端
    fn combined_streams<T>(&self, base: &str, symbols: &[String], suffix: &str, label: &str) -> Result<FeedReceiver<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let urls = chunked_stream_urls(base, symbols, suffix, self.streams_per_connection)?;
        info!(target: FEED_TARGET, label, symbols = symbols.len(), connections = urls.len(), "订阅组合流");

        if urls.is_empty() {
            // 没有品种可订阅时保持流开启，直到下游关闭
            tokio::spawn(async move { tx.closed().await });
            return Ok(rx);
        }

        for (i, url) in urls.into_iter().enumerate() {
            spawn_stream_reader(
                url,
                format!("{}#{}", label, i),
                tx.clone(),
                |payload: CombinedStreamPayload<T>| payload.data,
            );
        }
        Ok(rx)
    }
}

#[async_trait]
impl MarketFeed for BinanceMarketFeed {
    async fn catalog(&self) -> Result<SymbolCatalog> {
        self.api.get_symbol_catalog().await
    }

    async fn ticker_stream(&self) -> Result<FeedReceiver<Vec<TickerEvent>>> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let url = single_stream_url(&self.spot_ws_url, "!ticker@arr")?;
        spawn_stream_reader(url, "ticker".to_string(), tx, |batch: Vec<TickerEvent>| batch);
        Ok(rx)
    }

    async fn spot_trade_stream(&self, symbols: Vec<String>) -> Result<FeedReceiver<TradeEvent>> {
        self.combined_streams(&self.spot_ws_url, &symbols, "trade", "spot_trade")
    }

    async fn futures_trade_stream(&self, symbols: Vec<String>) -> Result<FeedReceiver<TradeEvent>> {
        self.combined_streams(&self.futures_ws_url, &symbols, "aggTrade", "futures_trade")
    }

    async fn mark_price_stream(&self, symbols: Vec<String>) -> Result<FeedReceiver<MarkPriceEvent>> {
        let suffix = mark_price_stream_suffix(FUNDING_REFRESH_INTERVAL);
        self.combined_streams(&self.futures_ws_url, &symbols, suffix, "mark_price")
    }
}
