//! 告警文本格式化（Telegram HTML）

use super::classifier::TickerAlert;
use super::ingest::{Market, TradeAlert};
use super::universe::base_symbol;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

const ALERT_TIME_FORMAT: &str = "%H:%M:%S %Y-%m-%d";
const BANNER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC%:z";

/// 按显示时区格式化毫秒时间戳，夏令时按时间戳当时的规则换算
pub fn format_timestamp(timestamp_ms: i64, zone: &Tz) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.with_timezone(zone).format(ALERT_TIME_FORMAT).to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// 启动通知
pub fn started_banner(now: DateTime<Utc>, zone: &Tz) -> String {
    format!("Started {}", now.with_timezone(zone).format(BANNER_TIME_FORMAT))
}

/// 千分位分组，例如 `21000000` -> `21,000,000`
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// 价格按最短精确表示输出，不补尾零
pub fn format_price(price: f64) -> String {
    format!("{}", price)
}

fn market_tag(is_futures: bool) -> &'static str {
    if is_futures {
        "F"
    } else {
        "S"
    }
}

/// `<b>#UP(1) #FOO(S)</b>: <u>3.00-5.00</u> P: <u>103</u> V: 21,000,000 T: 06:21:30 2023-11-15`
pub fn ticker_alert_text(alert: &TickerAlert, zone: &Tz) -> String {
    format!(
        "<b>#{}({}) #{}({})</b>: <u>{:4.2}-{:4.2}</u> P: <u>{}</u> V: {} T: {}",
        alert.direction.as_str(),
        alert.repeat_count,
        base_symbol(&alert.symbol),
        market_tag(alert.is_futures),
        alert.rate,
        alert.volume_rate,
        format_price(alert.price),
        group_thousands(alert.quote_volume as i64),
        format_timestamp(alert.timestamp_ms, zone),
    )
}

/// 现货：`<b>#BUY #FOO(S)</b> <u>1.00</u> P: <u>50</u> V: 500 Q: 10 <时间>`
///
/// 合约：`<b>#FSELL #FOO #R12</b> ...`，`#R` 后是四舍五入的占比。
pub fn trade_alert_text(alert: &TradeAlert, zone: &Tz) -> String {
    let base = base_symbol(&alert.symbol);
    let header = match alert.market {
        Market::Spot => format!(
            "<b>#{} #{}({})</b>",
            alert.channel().as_str(),
            base,
            market_tag(alert.is_futures)
        ),
        Market::Futures => format!(
            "<b>#{} #{} #R{}</b>",
            alert.channel().as_str(),
            base,
            alert.rate.round() as i64
        ),
    };

    format!(
        "{} <u>{:4.2}</u> P: <u>{}</u> V: {} Q: {} {}",
        header,
        alert.rate,
        format_price(alert.price),
        group_thousands(alert.value as i64),
        group_thousands(alert.quantity as i64),
        format_timestamp(alert.timestamp_ms, zone),
    )
}
