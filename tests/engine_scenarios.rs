//! 行情场景测试：按时间顺序回放 Ticker 与成交，检查告警方向、重复计数和文本

mod common;

use common::{catalog, ticker, trade, T0};
use market_filter::common::config::ThresholdConfig;
use market_filter::filter::{
    Channel, Direction, Dispatcher, Ingestor, Outgoing, SharedUniverse, SymbolUniverse, ThresholdField,
    ThresholdStore,
};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Scenario {
    ingestor: Ingestor,
    thresholds: Arc<ThresholdStore>,
    rx: mpsc::UnboundedReceiver<Outgoing>,
}

/// 默认阈值：窗口2分钟、涨2%、跌-5%、成交额增2%
fn scenario(capacity: usize) -> Scenario {
    let thresholds = Arc::new(ThresholdStore::from_config(&ThresholdConfig::default()));
    let universe = SymbolUniverse::from_catalog(&catalog(&["FOOUSDT", "BARUSDT"], &["BARUSDT"]), capacity);
    let (dispatcher, rx) = Dispatcher::new(thresholds.clone());
    let ingestor = Ingestor::new(
        thresholds.clone(),
        Arc::new(SharedUniverse::new(universe)),
        dispatcher,
        chrono_tz::UTC,
        vec!["BTC".to_string(), "ETH".to_string()],
    );
    Scenario { ingestor, thresholds, rx }
}

fn at(seconds: i64) -> i64 {
    T0 + seconds * 1000
}

#[test]
fn test_price_spike_alerts_up_with_formatted_text() {
    let mut s = scenario(64);

    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "100", "20000000", at(0))).is_none());
    let alert = s
        .ingestor
        .on_ticker(&ticker("FOOUSDT", "103", "21000000", at(90)))
        .unwrap();

    assert_eq!(alert.direction, Direction::Up);
    assert_eq!(alert.repeat_count, 1);
    assert!(!alert.is_futures);

    let outgoing = s.rx.try_recv().unwrap();
    assert_eq!(outgoing.channel, Channel::Up);
    assert_eq!(
        outgoing.text,
        "<b>#UP(1) #FOO(S)</b>: <u>3.00-5.00</u> P: <u>103</u> V: 21,000,000 T: 22:14:50 2023-11-14"
    );
}

#[test]
fn test_price_drop_alerts_down() {
    let mut s = scenario(64);

    s.ingestor.on_ticker(&ticker("BARUSDT", "100", "20000000", at(0)));
    let alert = s
        .ingestor
        .on_ticker(&ticker("BARUSDT", "94", "21000000", at(60)))
        .unwrap();

    assert_eq!(alert.direction, Direction::Down);
    assert!(alert.is_futures);
    let outgoing = s.rx.try_recv().unwrap();
    assert_eq!(outgoing.channel, Channel::Down);
    assert!(outgoing.text.starts_with("<b>#DOWN(1) #BAR(F)</b>: <u>-6.00-5.00</u>"));
}

#[test]
fn test_repeat_counting_and_debounce() {
    let s = scenario(64);
    let feed = |price: &str, qv: &str, seconds: i64| {
        s.ingestor.on_ticker(&ticker("FOOUSDT", price, qv, at(seconds)))
    };

    assert!(feed("100", "20000000", 0).is_none());
    assert_eq!(feed("103", "21000000", 90).unwrap().repeat_count, 1);

    // 上次告警后一个窗口内不再告警，但快照仍写入历史
    assert!(feed("106", "21500000", 150).is_none());

    assert_eq!(feed("109", "22000000", 210).unwrap().repeat_count, 2);
    assert_eq!(feed("112", "23000000", 330).unwrap().repeat_count, 3);

    // 距上次同向告警超过两个窗口，计数重置
    assert!(feed("112", "23100000", 800).is_none());
    let alert = feed("116", "24000000", 900).unwrap();
    assert_eq!(alert.direction, Direction::Up);
    assert_eq!(alert.repeat_count, 1);
}

#[test]
fn test_duplicate_second_is_dropped() {
    let s = scenario(64);
    s.ingestor.on_ticker(&ticker("FOOUSDT", "100", "20000000", at(0)));
    // 同一秒内的重复推送和乱序推送都不入历史
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "103", "21000000", at(0) + 500)).is_none());
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "103", "21000000", at(-30))).is_none());
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "103", "21000000", at(30))).is_some());
}

#[test]
fn test_out_of_band_volume_suppresses_alert() {
    let s = scenario(64);
    s.ingestor.on_ticker(&ticker("FOOUSDT", "100", "5000000", at(0)));
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "110", "6000000", at(60))).is_none());

    s.thresholds.set(ThresholdField::MinVolume, 1_000_000.0).unwrap();
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "120", "7000000", at(120))).is_some());
}

#[test]
fn test_first_tick_after_cold_start_never_alerts() {
    let s = scenario(64);
    // 只有占位快照时窗口为空或含零价格，不产生告警
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "500", "90000000", at(0))).is_none());
}

#[test]
fn test_small_history_evicts_oldest_snapshots() {
    let s = scenario(2);
    s.ingestor.on_ticker(&ticker("FOOUSDT", "100", "20000000", at(0)));
    s.ingestor.on_ticker(&ticker("FOOUSDT", "101", "20100000", at(10)));
    s.ingestor.on_ticker(&ticker("FOOUSDT", "102", "20200000", at(20)));

    // 容量为2时只剩 102 与 103，窗口最低价是 102，涨幅不到2%
    assert!(s.ingestor.on_ticker(&ticker("FOOUSDT", "103", "21000000", at(30))).is_none());
}

#[test]
fn test_large_spot_trade_alert() {
    let mut s = scenario(64);
    s.ingestor.on_ticker(&ticker("FOOUSDT", "50", "20000000", at(0)));

    // 10 @ 50：占比 1%，金额 500，默认阈值下不告警
    assert!(s.ingestor.on_spot_trade(&trade("FOOUSDT", "50", "10", true, at(1))).is_none());

    s.thresholds.set(ThresholdField::SpotLarge, 400.0).unwrap();
    let alert = s.ingestor.on_spot_trade(&trade("FOOUSDT", "50", "10", true, at(2))).unwrap();
    assert_eq!(alert.channel(), Channel::Sell);
    assert!((alert.rate - 1.0).abs() < 1e-9);
    assert_eq!(alert.value, 500.0);

    let outgoing = s.rx.try_recv().unwrap();
    assert_eq!(
        outgoing.text,
        "<b>#SELL #FOO(S)</b> <u>1.00</u> P: <u>50</u> V: 500 Q: 10 22:13:22 2023-11-14"
    );
}

#[test]
fn test_futures_trade_rate_alert_and_prefix_filter() {
    let mut s = scenario(64);
    s.ingestor.on_ticker(&ticker("BARUSDT", "50", "20000000", at(0)));

    // 120 / 1000 = 12%，超过合约占比阈值10%
    let alert = s.ingestor.on_futures_trade(&trade("BARUSDT", "50", "120", false, at(1))).unwrap();
    assert_eq!(alert.channel(), Channel::FBuy);
    assert!(s.rx.try_recv().unwrap().text.starts_with("<b>#FBUY #BAR #R12</b> <u>12.00</u>"));

    // 前缀过滤下匹配品种的每一笔都上报
    s.thresholds.set_futures_filter("BAR".to_string());
    assert!(s.ingestor.on_futures_trade(&trade("BARUSDT", "50", "1", true, at(2))).is_some());
    assert_eq!(s.rx.try_recv().unwrap().channel, Channel::FSell);

    s.thresholds.set_futures_filter("FOO".to_string());
    assert!(s.ingestor.on_futures_trade(&trade("BARUSDT", "50", "120", true, at(3))).is_none());
}
