//! 行情事件与交易所目录的数据结构
//!
//! 数值字段保持币安推送的字符串原样，解析放在各自的接入器里完成，
//! 解析失败只丢弃当前事件。

use serde::{Deserialize, Serialize};

/// 全市场24h Ticker（`!ticker@arr` 流的数组元素）
#[derive(Deserialize, Debug, Clone)]
pub struct TickerEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    /// 最优卖价
    #[serde(rename = "a")]
    pub ask_price: String,
    /// 24h成交量（基础资产）
    #[serde(rename = "v")]
    pub base_volume: String,
    /// 24h成交额（计价资产）
    #[serde(rename = "q")]
    pub quote_volume: String,
    /// 统计窗口结束时间（毫秒）
    #[serde(rename = "C")]
    pub close_time_ms: i64,
}

/// 逐笔成交，现货 `<symbol>@trade` 与合约 `<symbol>@aggTrade` 共用
#[derive(Deserialize, Debug, Clone)]
pub struct TradeEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time_ms: i64,
    /// 买方是否为做市方；为 true 时主动方是卖方
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// 合约标记价格（`<symbol>@markPrice`），只取资金费率
#[derive(Deserialize, Debug, Clone)]
pub struct MarkPriceEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "r")]
    pub funding_rate: String,
    #[serde(rename = "E")]
    pub event_time_ms: i64,
}

/// 组合流外层包装
#[derive(Deserialize, Debug)]
pub struct CombinedStreamPayload<T> {
    pub stream: String,
    pub data: T,
}

/// 交易所信息（现货与合约共用的最小字段集）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    /// 仅合约返回
    #[serde(rename = "contractType", default)]
    pub contract_type: String,
}

/// 品种目录：现货与合约分开列出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolCatalog {
    pub spot: Vec<String>,
    pub futures: Vec<String>,
}
