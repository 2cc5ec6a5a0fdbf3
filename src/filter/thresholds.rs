//! 可热更新的阈值与开关
//!
//! 每个字段各自原子读写，字段之间没有事务，批量修改期间读者可能看到新旧值混合。
//! 忽略列表与前缀过滤放在读写锁后面。

use crate::common::config::{constants::MAX_WINDOW_MINUTES, constants::MILLIS_PER_MINUTE, ThresholdConfig};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// 以 `u64` 位模式存储的原子浮点数
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// 告警投递频道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Up,
    Down,
    Buy,
    Sell,
    FBuy,
    FSell,
    /// 总开关
    All,
    /// 运维回复，始终投递
    System,
}

impl Channel {
    /// 可以被静音的频道（含总开关）
    pub const MUTABLE: [Channel; 7] = [
        Channel::Up,
        Channel::Down,
        Channel::Buy,
        Channel::Sell,
        Channel::FBuy,
        Channel::FSell,
        Channel::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Up => "UP",
            Channel::Down => "DOWN",
            Channel::Buy => "BUY",
            Channel::Sell => "SELL",
            Channel::FBuy => "FBUY",
            Channel::FSell => "FSELL",
            Channel::All => "ALL",
            Channel::System => "SYSTEM",
        }
    }

    /// 不区分大小写地解析频道名
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        Self::MUTABLE
            .iter()
            .chain(std::iter::once(&Channel::System))
            .copied()
            .find(|c| c.as_str() == upper)
    }

    fn flag_index(&self) -> Option<usize> {
        Self::MUTABLE.iter().position(|c| c == self)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `set` 指令可修改的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdField {
    SpotRate,
    FuturesRate,
    MinVolume,
    MaxVolume,
    SpotLarge,
    FuturesLarge,
    Window,
    Up,
    Down,
    Volume,
}

impl ThresholdField {
    pub const ALL: [ThresholdField; 10] = [
        ThresholdField::SpotRate,
        ThresholdField::FuturesRate,
        ThresholdField::MinVolume,
        ThresholdField::MaxVolume,
        ThresholdField::SpotLarge,
        ThresholdField::FuturesLarge,
        ThresholdField::Window,
        ThresholdField::Up,
        ThresholdField::Down,
        ThresholdField::Volume,
    ];

    /// 指令里使用的字段名
    pub fn name(&self) -> &'static str {
        match self {
            ThresholdField::SpotRate => "srate",
            ThresholdField::FuturesRate => "frate",
            ThresholdField::MinVolume => "minvolume",
            ThresholdField::MaxVolume => "maxvolume",
            ThresholdField::SpotLarge => "slarge",
            ThresholdField::FuturesLarge => "flarge",
            ThresholdField::Window => "window",
            ThresholdField::Up => "up",
            ThresholdField::Down => "down",
            ThresholdField::Volume => "volume",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL.iter().copied().find(|f| f.name() == lower)
    }

    /// 取值域：跌幅必须为负，窗口在 (0, 60] 分钟内，其余必须为正
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            ThresholdField::Down => value < 0.0,
            // 换算成毫秒后不能截断为0
            ThresholdField::Window => minutes_to_ms(value) > 0 && value <= MAX_WINDOW_MINUTES,
            _ => value > 0.0,
        }
    }
}

impl fmt::Display for ThresholdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("阈值 {field} 超出取值范围: {value}")]
pub struct OutOfDomain {
    pub field: ThresholdField,
    pub value: f64,
}

/// 全进程共享的阈值存储
#[derive(Debug)]
pub struct ThresholdStore {
    spot_rate: AtomicF64,
    futures_rate: AtomicF64,
    min_quote_volume: AtomicF64,
    max_quote_volume: AtomicF64,
    spot_large: AtomicF64,
    futures_large: AtomicF64,
    window_ms: AtomicI64,
    up: AtomicF64,
    down: AtomicF64,
    volume: AtomicF64,

    /// 与 `Channel::MUTABLE` 一一对应
    channels: [AtomicBool; 7],
    ignored: RwLock<HashSet<String>>,
    futures_filter: RwLock<String>,
}

impl ThresholdStore {
    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self {
            spot_rate: AtomicF64::new(config.spot_rate_pct),
            futures_rate: AtomicF64::new(config.futures_rate_pct),
            min_quote_volume: AtomicF64::new(config.min_quote_volume),
            max_quote_volume: AtomicF64::new(config.max_quote_volume),
            spot_large: AtomicF64::new(config.spot_large_trade_usd),
            futures_large: AtomicF64::new(config.futures_large_trade_usd),
            window_ms: AtomicI64::new(minutes_to_ms(config.window_minutes)),
            up: AtomicF64::new(config.up_pct),
            down: AtomicF64::new(config.down_pct),
            volume: AtomicF64::new(config.volume_pct),
            channels: std::array::from_fn(|_| AtomicBool::new(true)),
            ignored: RwLock::new(HashSet::new()),
            futures_filter: RwLock::new(String::new()),
        }
    }

    pub fn spot_rate(&self) -> f64 {
        self.spot_rate.load()
    }

    pub fn futures_rate(&self) -> f64 {
        self.futures_rate.load()
    }

    pub fn min_quote_volume(&self) -> f64 {
        self.min_quote_volume.load()
    }

    pub fn max_quote_volume(&self) -> f64 {
        self.max_quote_volume.load()
    }

    pub fn spot_large(&self) -> f64 {
        self.spot_large.load()
    }

    pub fn futures_large(&self) -> f64 {
        self.futures_large.load()
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms.load(Ordering::Relaxed)
    }

    pub fn up(&self) -> f64 {
        self.up.load()
    }

    pub fn down(&self) -> f64 {
        self.down.load()
    }

    pub fn volume(&self) -> f64 {
        self.volume.load()
    }

    /// 成交额是否落在 `[min, max]` 区间内
    pub fn in_volume_band(&self, quote_volume: f64) -> bool {
        quote_volume >= self.min_quote_volume() && quote_volume <= self.max_quote_volume()
    }

    /// 读取字段当前值，窗口以分钟返回
    pub fn get(&self, field: ThresholdField) -> f64 {
        match field {
            ThresholdField::SpotRate => self.spot_rate(),
            ThresholdField::FuturesRate => self.futures_rate(),
            ThresholdField::MinVolume => self.min_quote_volume(),
            ThresholdField::MaxVolume => self.max_quote_volume(),
            ThresholdField::SpotLarge => self.spot_large(),
            ThresholdField::FuturesLarge => self.futures_large(),
            ThresholdField::Window => self.window_ms() as f64 / MILLIS_PER_MINUTE as f64,
            ThresholdField::Up => self.up(),
            ThresholdField::Down => self.down(),
            ThresholdField::Volume => self.volume(),
        }
    }

    /// 校验并写入字段，越界时保持原值
    pub fn set(&self, field: ThresholdField, value: f64) -> Result<(), OutOfDomain> {
        if !field.accepts(value) {
            return Err(OutOfDomain { field, value });
        }

        match field {
            ThresholdField::SpotRate => self.spot_rate.store(value),
            ThresholdField::FuturesRate => self.futures_rate.store(value),
            ThresholdField::MinVolume => self.min_quote_volume.store(value),
            ThresholdField::MaxVolume => self.max_quote_volume.store(value),
            ThresholdField::SpotLarge => self.spot_large.store(value),
            ThresholdField::FuturesLarge => self.futures_large.store(value),
            ThresholdField::Window => self.window_ms.store(minutes_to_ms(value), Ordering::Relaxed),
            ThresholdField::Up => self.up.store(value),
            ThresholdField::Down => self.down.store(value),
            ThresholdField::Volume => self.volume.store(value),
        }
        Ok(())
    }

    /// 频道开关状态；SYSTEM 没有开关，始终为 true
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel.flag_index() {
            Some(i) => self.channels[i].load(Ordering::Relaxed),
            None => true,
        }
    }

    /// 静音一个频道；SYSTEM 不能静音，返回 false
    pub fn mute(&self, channel: Channel) -> bool {
        match channel.flag_index() {
            Some(i) => {
                self.channels[i].store(false, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// 取消静音
    ///
    /// ALL 会打开所有频道；单个频道在打开自己的同时打开总开关。
    pub fn unmute(&self, channel: Channel) -> bool {
        match channel {
            Channel::System => false,
            Channel::All => {
                for flag in &self.channels {
                    flag.store(true, Ordering::Relaxed);
                }
                true
            }
            other => {
                if let Some(i) = other.flag_index() {
                    self.channels[i].store(true, Ordering::Relaxed);
                }
                if let Some(all) = Channel::All.flag_index() {
                    self.channels[all].store(true, Ordering::Relaxed);
                }
                true
            }
        }
    }

    pub fn is_ignored(&self, symbol: &str) -> bool {
        self.ignored
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(symbol)
    }

    pub fn ignore(&self, symbol: String) {
        self.ignored
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol);
    }

    /// 移出忽略列表，原本不在列表中时返回 false
    pub fn unignore(&self, symbol: &str) -> bool {
        self.ignored
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(symbol)
    }

    /// 当前的合约品种前缀过滤，空字符串表示未设置
    pub fn futures_filter(&self) -> String {
        self.futures_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_futures_filter(&self, prefix: String) {
        *self.futures_filter.write().unwrap_or_else(PoisonError::into_inner) = prefix;
    }

    pub fn clear_futures_filter(&self) {
        self.set_futures_filter(String::new());
    }
}

fn minutes_to_ms(minutes: f64) -> i64 {
    (minutes * MILLIS_PER_MINUTE as f64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ThresholdStore {
        ThresholdStore::from_config(&ThresholdConfig::default())
    }

    #[test]
    fn test_atomic_f64_roundtrip() {
        let value = AtomicF64::new(-5.25);
        assert_eq!(value.load(), -5.25);
        value.store(1e9);
        assert_eq!(value.load(), 1e9);
    }

    #[test]
    fn test_defaults_from_config() {
        let s = store();
        assert_eq!(s.window_ms(), 120_000);
        assert_eq!(s.get(ThresholdField::Window), 2.0);
        assert_eq!(s.down(), -5.0);
        assert!(s.in_volume_band(10_000_000.0));
        assert!(s.in_volume_band(500_000_000.0));
        assert!(!s.in_volume_band(9_999_999.0));
    }

    #[test]
    fn test_set_rejects_out_of_domain_values() {
        let s = store();
        assert!(s.set(ThresholdField::Window, 0.0).is_err());
        assert!(s.set(ThresholdField::Window, 61.0).is_err());
        assert!(s.set(ThresholdField::Window, 0.00001).is_err());
        assert!(s.set(ThresholdField::Window, f64::NAN).is_err());
        assert!(s.set(ThresholdField::Down, 1.0).is_err());
        assert!(s.set(ThresholdField::Up, -1.0).is_err());
        assert!(s.set(ThresholdField::Volume, f64::NAN).is_err());
        assert_eq!(s.window_ms(), 120_000);
        assert_eq!(s.down(), -5.0);
        assert_eq!(s.up(), 2.0);

        s.set(ThresholdField::Window, 60.0).unwrap();
        assert_eq!(s.window_ms(), 3_600_000);
        // 最小可用窗口为1毫秒
        s.set(ThresholdField::Window, 1.0 / 60_000.0).unwrap();
        assert_eq!(s.window_ms(), 1);
        s.set(ThresholdField::Down, -3.5).unwrap();
        assert_eq!(s.down(), -3.5);
    }

    #[test]
    fn test_field_names_roundtrip() {
        for field in ThresholdField::ALL {
            assert_eq!(ThresholdField::parse(field.name()), Some(field));
        }
        assert_eq!(ThresholdField::parse("Window"), None);
    }

    #[test]
    fn test_channel_parse_is_case_insensitive() {
        assert_eq!(Channel::parse("buy"), Some(Channel::Buy));
        assert_eq!(Channel::parse("FSell"), Some(Channel::FSell));
        assert_eq!(Channel::parse("system"), Some(Channel::System));
        assert_eq!(Channel::parse("nope"), None);
    }

    #[test]
    fn test_mute_and_unmute() {
        let s = store();
        assert!(s.mute(Channel::Buy));
        assert!(!s.channel_enabled(Channel::Buy));
        assert!(!s.mute(Channel::System));
        assert!(s.channel_enabled(Channel::System));

        assert!(s.mute(Channel::All));
        assert!(s.unmute(Channel::Sell));
        // 单个频道取消静音会同时打开总开关
        assert!(s.channel_enabled(Channel::All));
        assert!(!s.channel_enabled(Channel::Buy));

        assert!(s.unmute(Channel::All));
        for channel in Channel::MUTABLE {
            assert!(s.channel_enabled(channel));
        }
    }

    #[test]
    fn test_ignore_set() {
        let s = store();
        s.ignore("FOOUSDT".to_string());
        assert!(s.is_ignored("FOOUSDT"));
        assert!(s.unignore("FOOUSDT"));
        assert!(!s.unignore("FOOUSDT"));
        assert!(!s.is_ignored("FOOUSDT"));
    }

    #[test]
    fn test_futures_filter() {
        let s = store();
        assert_eq!(s.futures_filter(), "");
        s.set_futures_filter("DOGE".to_string());
        assert_eq!(s.futures_filter(), "DOGE");
        s.clear_futures_filter();
        assert_eq!(s.futures_filter(), "");
    }
}
