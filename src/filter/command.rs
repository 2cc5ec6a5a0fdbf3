//! 运维指令
//!
//! 指令名在入口处一次性解析成封闭的 `Command` 枚举，未知指令返回类型化错误。
//! 所有回复都走 SYSTEM 频道。

use super::format::{format_price, group_thousands};
use super::thresholds::{Channel, ThresholdField, ThresholdStore};
use super::MarketFilter;
use crate::common::api::QUOTE_ASSET;
use thiserror::Error;
use tracing::{info, warn};

const COMMAND_TARGET: &str = "运维指令";

/// 资金费率排行的默认条数
const DEFAULT_RANKING_SIZE: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("wrong format")]
    WrongFormat,

    #[error("not found")]
    NotFound,

    #[error("{0} not found")]
    NotIgnored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ignore(String),
    Unignore(String),
    Mute(Channel),
    Unmute(Channel),
    Filter(String),
    Clear,
    Price(String),
    FundingRate(String),
    FundingRateTop(String),
    FundingRateBottom(String),
    Restart,
    Set(ThresholdField, f64),
    Get(String),
    RefreshSymbolUniverse,
    Working,
}

impl Command {
    /// 解析 `(指令名, 参数)`，指令名不区分大小写，可带前导 `/`
    pub fn parse(name: &str, args: &str) -> Result<Self, CommandError> {
        let normalized = name.trim().trim_start_matches('/').to_lowercase();
        let tokens: Vec<&str> = args.split_whitespace().collect();

        let command = match normalized.as_str() {
            "ignore" => Command::Ignore(usdt_symbol(single(&tokens)?)),
            "unignore" => Command::Unignore(usdt_symbol(single(&tokens)?)),
            "mute" => Command::Mute(channel(&tokens)?),
            "unmute" => Command::Unmute(channel(&tokens)?),
            "filter" => Command::Filter(single(&tokens)?.to_uppercase()),
            "clear" => Command::Clear,
            "price" | "p" => Command::Price(usdt_symbol(single(&tokens)?)),
            "fundingrate" | "fr" | "f" => {
                let symbol = single(&tokens)?.to_uppercase();
                if symbol.contains(QUOTE_ASSET) {
                    Command::FundingRate(symbol)
                } else {
                    Command::FundingRate(format!("{}{}", symbol, QUOTE_ASSET))
                }
            }
            "fundingratetop" | "frtop" | "ft" => Command::FundingRateTop(tokens.first().copied().unwrap_or("").to_string()),
            "fundingratebottom" | "frbot" | "fb" => {
                Command::FundingRateBottom(tokens.first().copied().unwrap_or("").to_string())
            }
            "restart" => Command::Restart,
            "set" | "s" => {
                let [field, value] = tokens.as_slice() else {
                    return Err(CommandError::WrongFormat);
                };
                let field = ThresholdField::parse(field).ok_or(CommandError::WrongFormat)?;
                let value = value.parse::<f64>().map_err(|_| CommandError::WrongFormat)?;
                Command::Set(field, value)
            }
            "get" | "g" => Command::Get(tokens.first().copied().unwrap_or("").to_string()),
            "refreshsymboluniverse" | "update" => Command::RefreshSymbolUniverse,
            "working" => Command::Working,
            _ => return Err(CommandError::UnknownCommand(name.trim().to_string())),
        };
        Ok(command)
    }
}

fn single<'a>(tokens: &[&'a str]) -> Result<&'a str, CommandError> {
    match tokens {
        [one] => Ok(*one),
        _ => Err(CommandError::WrongFormat),
    }
}

fn channel(tokens: &[&str]) -> Result<Channel, CommandError> {
    Channel::parse(single(tokens)?).ok_or(CommandError::WrongFormat)
}

/// `foo` -> `FOOUSDT`
fn usdt_symbol(base: &str) -> String {
    format!("{}{}", base.to_uppercase(), QUOTE_ASSET)
}

/// `set` 成功后的回复
pub fn set_reply(field: ThresholdField, value: f64) -> String {
    match field {
        ThresholdField::SpotRate => format!("SRate to {:.2}%", value),
        ThresholdField::FuturesRate => format!("FRate to {:.2}%", value),
        ThresholdField::MinVolume => format!("Min Volume to {}$", group_thousands(value as i64)),
        ThresholdField::MaxVolume => format!("Max Volume to {}$", group_thousands(value as i64)),
        ThresholdField::SpotLarge => format!("SLarge to {}$", group_thousands(value as i64)),
        ThresholdField::FuturesLarge => format!("FLarge to {}$", group_thousands(value as i64)),
        ThresholdField::Window => format!("Window to {:.2} minute(s)", value),
        ThresholdField::Up => format!("Up to {:.2}%", value),
        ThresholdField::Down => format!("Down to {:.2}%", value),
        ThresholdField::Volume => format!("Volume to {:.2}%", value),
    }
}

/// `get config` 的回复
pub fn render_config(store: &ThresholdStore) -> String {
    format!(
        "SRate: {:.2}%\nFRate: {:.2}%\nMin Volume: {}$\nMax Volume: {}$\nSLarge: {}$\nFLarge: {}$\nWindow: {:.2} minute(s)\nUp: {:.2}%\nDown: {:.2}%\nVolume: {:.2}%",
        store.spot_rate(),
        store.futures_rate(),
        group_thousands(store.min_quote_volume() as i64),
        group_thousands(store.max_quote_volume() as i64),
        group_thousands(store.spot_large() as i64),
        group_thousands(store.futures_large() as i64),
        store.get(ThresholdField::Window),
        store.up(),
        store.down(),
        store.volume(),
    )
}

/// 资金费率排行
///
/// 条数解析失败或不小于总数时取默认值3，并截断到总数。按费率降序、品种名升序排序；
/// `top` 为 false 时从最低的开始列出。
pub fn funding_ranking(mut rates: Vec<(String, f64)>, raw_count: &str, top: bool) -> String {
    let count = match raw_count.trim().parse::<usize>() {
        Ok(n) if n < rates.len() => n,
        _ => DEFAULT_RANKING_SIZE,
    }
    .min(rates.len());

    rates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if !top {
        rates.reverse();
    }

    rates
        .iter()
        .take(count)
        .map(|(symbol, rate)| format!("{}: {:.4}\n", symbol, rate))
        .collect()
}

impl MarketFilter {
    /// 处理一条运维指令，回复投递到 SYSTEM 频道并返回
    pub async fn handle_command(&self, name: &str, args: &str) -> String {
        let reply = match Command::parse(name, args) {
            Ok(command) => {
                info!(target: COMMAND_TARGET, command = ?command, "执行运维指令");
                match self.execute(command).await {
                    Ok(reply) => reply,
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => {
                warn!(target: COMMAND_TARGET, name, args, error = %e, "运维指令无法解析");
                e.to_string()
            }
        };

        if !reply.is_empty() {
            self.dispatcher().deliver(Channel::System, reply.clone());
        }
        reply
    }

    /// 执行已解析的指令，返回回复文本
    pub async fn execute(&self, command: Command) -> Result<String, CommandError> {
        let thresholds = self.thresholds();
        match command {
            Command::Ignore(symbol) => {
                thresholds.ignore(symbol.clone());
                Ok(format!("{} ignored", symbol))
            }
            Command::Unignore(symbol) => {
                if thresholds.unignore(&symbol) {
                    Ok(format!("{} unignored", symbol))
                } else {
                    Err(CommandError::NotIgnored(symbol))
                }
            }
            Command::Mute(channel) => {
                if thresholds.mute(channel) {
                    Ok("muted".to_string())
                } else {
                    Err(CommandError::WrongFormat)
                }
            }
            Command::Unmute(channel) => {
                if thresholds.unmute(channel) {
                    Ok("unmuted".to_string())
                } else {
                    Err(CommandError::WrongFormat)
                }
            }
            Command::Filter(prefix) => {
                thresholds.set_futures_filter(prefix.clone());
                Ok(format!("filter {}", prefix))
            }
            Command::Clear => {
                thresholds.clear_futures_filter();
                Ok("cleared".to_string())
            }
            Command::Price(symbol) => {
                let universe = self.universe();
                let state = universe.state(&symbol).ok_or(CommandError::NotFound)?;
                Ok(format_price(state.latest().price))
            }
            Command::FundingRate(symbol) => {
                let rate = self.universe().funding_rate(&symbol).ok_or(CommandError::NotFound)?;
                Ok(format!("{:.4}", rate))
            }
            Command::FundingRateTop(count) => {
                ranking_reply(funding_ranking(self.universe().funding_rates(), &count, true))
            }
            Command::FundingRateBottom(count) => {
                ranking_reply(funding_ranking(self.universe().funding_rates(), &count, false))
            }
            Command::Restart => match self.restart_feeds().await {
                Ok(()) => Ok("restarted".to_string()),
                Err(e) => {
                    warn!(
                        target: COMMAND_TARGET,
                        { error.summary = e.get_error_type_summary(),
                        error.details = %e },
                        "重启行情任务失败"
                    );
                    Ok("restart failed".to_string())
                }
            },
            Command::Set(field, value) => {
                thresholds.set(field, value).map_err(|_| CommandError::WrongFormat)?;
                info!(target: COMMAND_TARGET, field = field.name(), value, "阈值已更新");
                Ok(set_reply(field, value))
            }
            Command::Get(what) => {
                if what == "config" {
                    Ok(render_config(thresholds))
                } else {
                    Ok("unsupported".to_string())
                }
            }
            Command::RefreshSymbolUniverse => match self.refresh_universe().await {
                Ok(_) => Ok("updated".to_string()),
                Err(_) => Ok("failed".to_string()),
            },
            Command::Working => Ok("Yes!".to_string()),
        }
    }
}

fn ranking_reply(ranking: String) -> Result<String, CommandError> {
    if ranking.is_empty() {
        Err(CommandError::NotFound)
    } else {
        Ok(ranking)
    }
}
