//! Ticker 告警判定
//!
//! 纯计算：给定历史、当前快照和阈值，决定是否产生一条涨跌告警，
//! 并维护同方向连续告警计数。只在 Ticker 任务里调用。

use super::history::{BoundedHistory, Snapshot};
use super::thresholds::{Channel, ThresholdStore};

/// 涨跌方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn channel(&self) -> Channel {
        match self {
            Direction::Up => Channel::Up,
            Direction::Down => Channel::Down,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.channel().as_str()
    }
}

/// 每个品种的告警状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
    /// 最近一次告警的 Ticker 时间（任意方向），用于去抖
    pub last_alert_ms: i64,
    pub last_up_ms: Option<i64>,
    pub last_down_ms: Option<i64>,
    pub up_count: u32,
    pub down_count: u32,
}

impl AlertState {
    /// 距上次告警不足一个窗口
    pub fn debounced(&self, tick_ms: i64, window_ms: i64) -> bool {
        tick_ms < self.last_alert_ms + window_ms
    }

    /// 记录一次告警并返回该方向的连续次数
    ///
    /// 距同方向上次告警不超过两个窗口时累加，否则重置为1。
    pub fn record(&mut self, direction: Direction, tick_ms: i64, window_ms: i64) -> u32 {
        let (last, count) = match direction {
            Direction::Up => (&mut self.last_up_ms, &mut self.up_count),
            Direction::Down => (&mut self.last_down_ms, &mut self.down_count),
        };

        *count = match *last {
            Some(prev) if tick_ms <= prev + 2 * window_ms => *count + 1,
            _ => 1,
        };
        *last = Some(tick_ms);
        self.last_alert_ms = tick_ms;
        *count
    }
}

/// 一次判定所用的阈值，每个 Ticker 读取一次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerThresholds {
    pub up: f64,
    pub down: f64,
    pub volume: f64,
    pub window_ms: i64,
}

impl TickerThresholds {
    pub fn load(store: &ThresholdStore) -> Self {
        Self {
            up: store.up(),
            down: store.down(),
            volume: store.volume(),
            window_ms: store.window_ms(),
        }
    }
}

/// 判定出的价格异动（尚未计数）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceMove {
    pub direction: Direction,
    pub rate: f64,
    pub volume_rate: f64,
}

/// 已分类的涨跌告警
#[derive(Debug, Clone, PartialEq)]
pub struct TickerAlert {
    pub direction: Direction,
    pub repeat_count: u32,
    pub symbol: String,
    pub rate: f64,
    pub price: f64,
    pub volume_rate: f64,
    pub quote_volume: f64,
    pub is_futures: bool,
    pub timestamp_ms: i64,
}

/// 判断当前快照相对窗口内历史是否构成异动
///
/// `tick` 必须已经写入 `history`。同一个 Ticker 只选一个方向：
/// 涨跌同时达标时取 DOWN。
pub fn evaluate(history: &BoundedHistory, tick: &Snapshot, t: &TickerThresholds) -> Option<PriceMove> {
    let stats = history.window_min_max(tick.timestamp_ms - t.window_ms)?;

    let min_price = stats.min.price;
    let max_price = stats.max.price;
    let up_rate = (tick.price - min_price) * 100.0 / min_price;
    let down_rate = (tick.price - max_price) * 100.0 / max_price;

    let up_hit = up_rate >= t.up;
    let down_hit = down_rate <= t.down;
    if !up_hit && !down_hit {
        return None;
    }

    let baseline_volume = stats.baseline.quote_volume;
    if baseline_volume <= 0.0 {
        return None;
    }
    let volume_rate = (tick.quote_volume - baseline_volume) * 100.0 / baseline_volume;
    if volume_rate < t.volume {
        return None;
    }

    let (direction, rate) = if down_hit {
        (Direction::Down, down_rate)
    } else {
        (Direction::Up, up_rate)
    };

    Some(PriceMove { direction, rate, volume_rate })
}

/// 判定并更新告警计数
pub fn classify(
    symbol: &str,
    is_futures: bool,
    history: &BoundedHistory,
    state: &mut AlertState,
    tick: &Snapshot,
    t: &TickerThresholds,
) -> Option<TickerAlert> {
    let price_move = evaluate(history, tick, t)?;
    let repeat_count = state.record(price_move.direction, tick.timestamp_ms, t.window_ms);

    Some(TickerAlert {
        direction: price_move.direction,
        repeat_count,
        symbol: symbol.to_string(),
        rate: price_move.rate,
        price: tick.price,
        volume_rate: price_move.volume_rate,
        quote_volume: tick.quote_volume,
        is_futures,
        timestamp_ms: tick.timestamp_ms,
    })
}
