//! 集成测试共用的行情源与通知接口替身

#![allow(dead_code)]

use async_trait::async_trait;
use market_filter::common::{AppError, MarkPriceEvent, Result, SymbolCatalog, TickerEvent, TradeEvent};
use market_filter::filter::{Channel, FeedReceiver, MarketFeed, NotificationSink};
use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const T0: i64 = 1_700_000_000_000;

/// 固定目录的行情源，所有流都保持打开但不推送
#[derive(Default)]
pub struct IdleFeed {
    pub catalog: Mutex<SymbolCatalog>,
    senders: Mutex<Vec<Box<dyn Any + Send>>>,
}

impl IdleFeed {
    pub fn new(spot: &[&str], futures: &[&str]) -> Arc<Self> {
        let feed = Self::default();
        *feed.catalog.lock().unwrap() = catalog(spot, futures);
        Arc::new(feed)
    }

    fn open<T: Send + 'static>(&self) -> FeedReceiver<T> {
        let (tx, rx) = mpsc::channel::<Result<T>>(16);
        self.senders.lock().unwrap().push(Box::new(tx));
        rx
    }
}

#[async_trait]
impl MarketFeed for IdleFeed {
    async fn catalog(&self) -> Result<SymbolCatalog> {
        let catalog = self.catalog.lock().unwrap().clone();
        if catalog.spot.is_empty() {
            return Err(AppError::ApiError("empty catalog".to_string()));
        }
        Ok(catalog)
    }

    async fn ticker_stream(&self) -> Result<FeedReceiver<Vec<TickerEvent>>> {
        Ok(self.open())
    }

    async fn spot_trade_stream(&self, _symbols: Vec<String>) -> Result<FeedReceiver<TradeEvent>> {
        Ok(self.open())
    }

    async fn futures_trade_stream(&self, _symbols: Vec<String>) -> Result<FeedReceiver<TradeEvent>> {
        Ok(self.open())
    }

    async fn mark_price_stream(&self, _symbols: Vec<String>) -> Result<FeedReceiver<MarkPriceEvent>> {
        Ok(self.open())
    }
}

/// 把投递的消息转发到测试可读的通道
pub struct ChannelSink(pub mpsc::UnboundedSender<(Channel, String)>);

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn post(&self, channel: Channel, text: &str) -> Result<()> {
        self.0
            .send((channel, text.to_string()))
            .map_err(|e| AppError::NotifyError(e.to_string()))
    }
}

pub fn catalog(spot: &[&str], futures: &[&str]) -> SymbolCatalog {
    SymbolCatalog {
        spot: spot.iter().map(|s| s.to_string()).collect(),
        futures: futures.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn ticker(symbol: &str, price: &str, quote_volume: &str, ts: i64) -> TickerEvent {
    TickerEvent {
        symbol: symbol.to_string(),
        ask_price: price.to_string(),
        base_volume: "1000".to_string(),
        quote_volume: quote_volume.to_string(),
        close_time_ms: ts,
    }
}

pub fn trade(symbol: &str, price: &str, quantity: &str, is_buyer_maker: bool, ts: i64) -> TradeEvent {
    TradeEvent {
        symbol: symbol.to_string(),
        price: price.to_string(),
        quantity: quantity.to_string(),
        trade_time_ms: ts,
        is_buyer_maker,
    }
}

pub fn mark_price(symbol: &str, funding_rate: &str) -> MarkPriceEvent {
    MarkPriceEvent {
        symbol: symbol.to_string(),
        funding_rate: funding_rate.to_string(),
        event_time_ms: T0,
    }
}

/// 取下一条投递的消息
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<(Channel, String)>) -> (Channel, String) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no message delivered")
        .expect("sink closed")
}

/// 断言一段时间内没有消息投递
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<(Channel, String)>) {
    let pending = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(pending.is_err(), "unexpected message: {:?}", pending);
}
