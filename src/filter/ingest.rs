//! 行情接入
//!
//! 四类行情各有一个接入入口，逐条处理事件：校验、更新状态、必要时产生告警并投递。
//! 被忽略的品种、解析失败的字段、未跟踪的品种、流动性区间外的数据都直接丢弃，不记日志。

use super::classifier::{classify, TickerAlert, TickerThresholds};
use super::dispatcher::Dispatcher;
use super::format::{ticker_alert_text, trade_alert_text};
use super::history::Snapshot;
use super::thresholds::{Channel, ThresholdStore};
use super::universe::{SharedUniverse, SymbolUniverse};
use crate::common::{MarkPriceEvent, TickerEvent, TradeEvent};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::info;

const ALERT_TARGET: &str = "异动告警";

/// 成交所在市场
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Spot,
    Futures,
}

/// 主动方方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// 买方是做市方时主动方是卖方
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

/// 大单/快单告警
#[derive(Debug, Clone, PartialEq)]
pub struct TradeAlert {
    pub market: Market,
    pub side: Side,
    pub symbol: String,
    /// 成交量占24h成交量的百分比
    pub rate: f64,
    pub price: f64,
    /// 成交金额
    pub value: f64,
    pub quantity: f64,
    pub is_futures: bool,
    pub timestamp_ms: i64,
}

impl TradeAlert {
    pub fn channel(&self) -> Channel {
        match (self.market, self.side) {
            (Market::Spot, Side::Buy) => Channel::Buy,
            (Market::Spot, Side::Sell) => Channel::Sell,
            (Market::Futures, Side::Buy) => Channel::FBuy,
            (Market::Futures, Side::Sell) => Channel::FSell,
        }
    }
}

/// 四类行情共用的接入器
#[derive(Debug, Clone)]
pub struct Ingestor {
    thresholds: Arc<ThresholdStore>,
    universe: Arc<SharedUniverse>,
    dispatcher: Dispatcher,
    zone: Tz,
    excluded_futures_prefixes: Arc<Vec<String>>,
}

impl Ingestor {
    pub fn new(
        thresholds: Arc<ThresholdStore>,
        universe: Arc<SharedUniverse>,
        dispatcher: Dispatcher,
        zone: Tz,
        excluded_futures_prefixes: Vec<String>,
    ) -> Self {
        Self {
            thresholds,
            universe,
            dispatcher,
            zone,
            excluded_futures_prefixes: Arc::new(excluded_futures_prefixes),
        }
    }

    /// 处理一批全市场 Ticker，整批共用同一份目录快照
    pub fn on_ticker_batch(&self, batch: &[TickerEvent]) -> Vec<TickerAlert> {
        let universe = self.universe.load();
        batch
            .iter()
            .filter_map(|event| self.on_ticker_with(&universe, event))
            .collect()
    }

    pub fn on_ticker(&self, event: &TickerEvent) -> Option<TickerAlert> {
        let universe = self.universe.load();
        self.on_ticker_with(&universe, event)
    }

    fn on_ticker_with(&self, universe: &SymbolUniverse, event: &TickerEvent) -> Option<TickerAlert> {
        if self.thresholds.is_ignored(&event.symbol) {
            return None;
        }
        let state = universe.tracked(&event.symbol)?;

        let price = event.ask_price.parse::<f64>().ok()?;
        let base_volume = event.base_volume.parse::<f64>().ok()?;
        let quote_volume = event.quote_volume.parse::<f64>().ok()?;
        let tick = Snapshot::new(price, base_volume, quote_volume, event.close_time_ms);

        // 按秒去重，乱序和重复的推送都不入历史
        if !state.record_if_newer(tick) {
            return None;
        }

        if !self.thresholds.in_volume_band(quote_volume) {
            return None;
        }

        let t = TickerThresholds::load(&self.thresholds);
        let alert = {
            let mut alert_state = state.alert_state();
            if alert_state.debounced(tick.timestamp_ms, t.window_ms) {
                return None;
            }
            let history = state.history();
            classify(state.symbol(), state.is_futures(), &history, &mut alert_state, &tick, &t)?
        };

        info!(
            target: ALERT_TARGET,
            symbol = %alert.symbol,
            direction = alert.direction.as_str(),
            repeat = alert.repeat_count,
            rate = alert.rate,
            volume_rate = alert.volume_rate,
            "价格异动"
        );
        self.dispatcher
            .deliver(alert.direction.channel(), ticker_alert_text(&alert, &self.zone));
        Some(alert)
    }

    /// 现货逐笔成交
    pub fn on_spot_trade(&self, event: &TradeEvent) -> Option<TradeAlert> {
        if self.thresholds.is_ignored(&event.symbol) {
            return None;
        }

        let alert = self.measure_trade(Market::Spot, event)?;
        if alert.rate >= self.thresholds.spot_rate() || alert.value >= self.thresholds.spot_large() {
            self.emit_trade(&alert);
            return Some(alert);
        }
        None
    }

    /// 合约归集成交
    ///
    /// 设置了品种前缀过滤时只看匹配的品种，并且匹配品种的每一笔成交都会上报。
    pub fn on_futures_trade(&self, event: &TradeEvent) -> Option<TradeAlert> {
        if self.thresholds.is_ignored(&event.symbol) {
            return None;
        }
        if self
            .excluded_futures_prefixes
            .iter()
            .any(|prefix| event.symbol.starts_with(prefix.as_str()))
        {
            return None;
        }

        let filter = self.thresholds.futures_filter();
        if !filter.is_empty() && !event.symbol.starts_with(filter.as_str()) {
            return None;
        }

        let alert = self.measure_trade(Market::Futures, event)?;
        if !filter.is_empty()
            || alert.rate >= self.thresholds.futures_rate()
            || alert.value >= self.thresholds.futures_large()
        {
            self.emit_trade(&alert);
            return Some(alert);
        }
        None
    }

    /// 资金费率，只更新数值不告警
    pub fn on_mark_price(&self, event: &MarkPriceEvent) -> bool {
        if self.thresholds.is_ignored(&event.symbol) {
            return false;
        }
        match event.funding_rate.parse::<f64>() {
            Ok(rate) => self.universe.load().set_funding_rate(&event.symbol, rate * 100.0),
            Err(_) => false,
        }
    }

    /// 按品种最新快照计算成交占比和金额，快照无效或成交额不在区间内时返回 `None`
    fn measure_trade(&self, market: Market, event: &TradeEvent) -> Option<TradeAlert> {
        let price = event.price.parse::<f64>().ok()?;
        let quantity = event.quantity.parse::<f64>().ok()?;

        let universe = self.universe.load();
        let state = universe.tracked(&event.symbol)?;
        let latest = state.latest();
        if latest.base_volume == 0.0 || !self.thresholds.in_volume_band(latest.quote_volume) {
            return None;
        }

        Some(TradeAlert {
            market,
            side: Side::from_buyer_maker(event.is_buyer_maker),
            symbol: event.symbol.clone(),
            rate: quantity * 100.0 / latest.base_volume,
            price,
            value: quantity * price,
            quantity,
            is_futures: state.is_futures(),
            timestamp_ms: event.trade_time_ms,
        })
    }

    fn emit_trade(&self, alert: &TradeAlert) {
        info!(
            target: ALERT_TARGET,
            symbol = %alert.symbol,
            channel = alert.channel().as_str(),
            rate = alert.rate,
            value = alert.value,
            "大额成交"
        );
        self.dispatcher.deliver(alert.channel(), trade_alert_text(alert, &self.zone));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::ThresholdConfig;
    use crate::common::SymbolCatalog;
    use crate::filter::classifier::Direction;
    use crate::filter::dispatcher::Outgoing;
    use tokio::sync::mpsc;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        ingestor: Ingestor,
        thresholds: Arc<ThresholdStore>,
        universe: Arc<SharedUniverse>,
        rx: mpsc::UnboundedReceiver<Outgoing>,
    }

    fn fixture() -> Fixture {
        let thresholds = Arc::new(ThresholdStore::from_config(&ThresholdConfig::default()));
        let catalog = SymbolCatalog {
            spot: vec!["FOOUSDT".to_string(), "BTCUSDT".to_string()],
            futures: vec!["FOOUSDT".to_string(), "BTCUSDT".to_string()],
        };
        let universe = Arc::new(SharedUniverse::new(SymbolUniverse::from_catalog(&catalog, 64)));
        let (dispatcher, rx) = Dispatcher::new(thresholds.clone());
        let ingestor = Ingestor::new(
            thresholds.clone(),
            universe.clone(),
            dispatcher,
            chrono_tz::UTC,
            vec!["BTC".to_string(), "ETH".to_string()],
        );
        Fixture { ingestor, thresholds, universe, rx }
    }

    fn ticker(symbol: &str, price: &str, quote_volume: &str, ts: i64) -> TickerEvent {
        TickerEvent {
            symbol: symbol.to_string(),
            ask_price: price.to_string(),
            base_volume: "1000".to_string(),
            quote_volume: quote_volume.to_string(),
            close_time_ms: ts,
        }
    }

    fn trade(symbol: &str, price: &str, quantity: &str, is_buyer_maker: bool) -> TradeEvent {
        TradeEvent {
            symbol: symbol.to_string(),
            price: price.to_string(),
            quantity: quantity.to_string(),
            trade_time_ms: T0,
            is_buyer_maker,
        }
    }

    #[test]
    fn test_ticker_up_alert_is_delivered() {
        let mut f = fixture();
        assert!(f.ingestor.on_ticker(&ticker("FOOUSDT", "100", "20000000", T0)).is_none());
        let alert = f
            .ingestor
            .on_ticker(&ticker("FOOUSDT", "103", "21000000", T0 + 90_000))
            .unwrap();
        assert_eq!(alert.direction, Direction::Up);
        assert_eq!(alert.repeat_count, 1);
        assert!(alert.is_futures);

        let message = f.rx.try_recv().unwrap();
        assert_eq!(message.channel, Channel::Up);
        assert!(message.text.starts_with("<b>#UP(1) #FOO(F)</b>: <u>3.00-5.00</u>"));
    }

    #[test]
    fn test_ticker_dedupes_by_second() {
        let f = fixture();
        f.ingestor.on_ticker(&ticker("FOOUSDT", "100", "20000000", T0 + 500));
        // 同一秒内的推送被丢弃
        f.ingestor.on_ticker(&ticker("FOOUSDT", "101", "20000000", T0 + 900));
        // 更早的推送被丢弃
        f.ingestor.on_ticker(&ticker("FOOUSDT", "102", "20000000", T0 - 1000));

        let universe = f.universe.load();
        let state = universe.tracked("FOOUSDT").unwrap();
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.latest().price, 100.0);
    }

    #[test]
    fn test_ticker_parse_failure_and_unknown_symbol_are_dropped() {
        let f = fixture();
        assert!(f.ingestor.on_ticker(&ticker("FOOUSDT", "abc", "20000000", T0)).is_none());
        assert!(f.ingestor.on_ticker(&ticker("NOPEUSDT", "1", "20000000", T0)).is_none());
        let universe = f.universe.load();
        assert_eq!(universe.tracked("FOOUSDT").unwrap().history().len(), 1);
    }

    #[test]
    fn test_ticker_outside_volume_band_is_recorded_but_not_alerted() {
        let f = fixture();
        f.ingestor.on_ticker(&ticker("FOOUSDT", "100", "1000", T0));
        assert!(f.ingestor.on_ticker(&ticker("FOOUSDT", "150", "2000", T0 + 60_000)).is_none());
        let universe = f.universe.load();
        assert_eq!(universe.tracked("FOOUSDT").unwrap().history().len(), 3);
    }

    #[test]
    fn test_ignored_symbol_is_dropped() {
        let f = fixture();
        f.thresholds.ignore("FOOUSDT".to_string());
        f.ingestor.on_ticker(&ticker("FOOUSDT", "100", "20000000", T0));
        let universe = f.universe.load();
        assert_eq!(universe.tracked("FOOUSDT").unwrap().history().len(), 1);
    }

    #[test]
    fn test_spot_trade_rate_and_value() {
        let mut f = fixture();
        f.ingestor.on_ticker(&ticker("FOOUSDT", "50", "20000000", T0));

        // 占比 1%，金额 500：默认阈值下不告警
        assert!(f.ingestor.on_spot_trade(&trade("FOOUSDT", "50", "10", false)).is_none());

        f.thresholds
            .set(crate::filter::thresholds::ThresholdField::SpotLarge, 400.0)
            .unwrap();
        let alert = f.ingestor.on_spot_trade(&trade("FOOUSDT", "50", "10", true)).unwrap();
        assert!((alert.rate - 1.0).abs() < 1e-9);
        assert_eq!(alert.value, 500.0);
        assert_eq!(alert.side, Side::Sell);
        assert_eq!(f.rx.try_recv().unwrap().channel, Channel::Sell);
    }

    #[test]
    fn test_trade_without_snapshot_is_dropped() {
        let f = fixture();
        // 只有零值占位快照
        assert!(f.ingestor.on_spot_trade(&trade("FOOUSDT", "50", "1000000", false)).is_none());
    }

    #[test]
    fn test_futures_excluded_prefix_and_filter() {
        let mut f = fixture();
        f.ingestor.on_ticker(&ticker("FOOUSDT", "50", "20000000", T0));
        f.ingestor.on_ticker(&ticker("BTCUSDT", "50", "20000000", T0));

        // 排除前缀的品种即使是巨额成交也不报
        assert!(f.ingestor.on_futures_trade(&trade("BTCUSDT", "50", "900", false)).is_none());

        // 占比 20% 超过合约阈值 10%
        let alert = f.ingestor.on_futures_trade(&trade("FOOUSDT", "50", "200", false)).unwrap();
        assert_eq!(alert.channel(), Channel::FBuy);
        let text = f.rx.try_recv().unwrap().text;
        assert!(text.starts_with("<b>#FBUY #FOO #R20</b>"));

        // 前缀过滤：匹配品种的小额成交也上报
        f.thresholds.set_futures_filter("FOO".to_string());
        assert!(f.ingestor.on_futures_trade(&trade("FOOUSDT", "50", "1", true)).is_some());
        f.thresholds.set_futures_filter("BAR".to_string());
        assert!(f.ingestor.on_futures_trade(&trade("FOOUSDT", "50", "200", true)).is_none());
    }

    #[test]
    fn test_mark_price_updates_funding_rate() {
        let f = fixture();
        let event = MarkPriceEvent {
            symbol: "FOOUSDT".to_string(),
            funding_rate: "0.00010000".to_string(),
            event_time_ms: T0,
        };
        assert!(f.ingestor.on_mark_price(&event));
        let rate = f.universe.load().funding_rate("FOOUSDT").unwrap();
        assert!((rate - 0.01).abs() < 1e-12);

        let bad = MarkPriceEvent { funding_rate: "x".to_string(), ..event };
        assert!(!f.ingestor.on_mark_price(&bad));
    }
}
