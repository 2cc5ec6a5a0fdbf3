//! 品种目录与每个品种的运行状态
//!
//! 目录按写时复制的方式整体替换：读者克隆 `Arc` 后在自己的快照上遍历，
//! 刷新时构建新目录再原子换入。仍在跟踪的品种沿用原有的 `Arc<SymbolState>`，
//! 历史与告警计数不受影响；被移除的品种状态保留但不再接收行情。

use super::classifier::AlertState;
use super::history::{BoundedHistory, Snapshot};
use super::thresholds::AtomicF64;
use crate::common::api::QUOTE_ASSET;
use crate::common::SymbolCatalog;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// 资金费率推送间隔
pub const FUNDING_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// 目录中的一个现货品种
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listing {
    /// 同名合约是否存在
    pub is_futures: bool,
    pub funding_refresh_interval: Duration,
}

/// 单个品种的运行状态
///
/// 历史与告警计数只由 Ticker 任务写入；成交任务只读 `latest`，不碰历史缓冲区。
#[derive(Debug)]
pub struct SymbolState {
    symbol: String,
    is_futures: AtomicBool,
    history: Mutex<BoundedHistory>,
    alert: Mutex<AlertState>,
    latest: RwLock<Snapshot>,
}

impl SymbolState {
    pub fn new(symbol: String, capacity: usize, is_futures: bool) -> Self {
        Self {
            symbol,
            is_futures: AtomicBool::new(is_futures),
            history: Mutex::new(BoundedHistory::seeded(capacity)),
            alert: Mutex::new(AlertState::default()),
            latest: RwLock::new(Snapshot::default()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_futures(&self) -> bool {
        self.is_futures.load(Ordering::Relaxed)
    }

    fn set_futures(&self, is_futures: bool) {
        self.is_futures.store(is_futures, Ordering::Relaxed);
    }

    /// 最近一次写入的快照
    pub fn latest(&self) -> Snapshot {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 写入一条新快照并更新 `latest`
    pub fn record(&self, snapshot: Snapshot) {
        self.history().push(snapshot);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// 只接受比最新快照更晚（按秒比较）的快照
    pub fn record_if_newer(&self, snapshot: Snapshot) -> bool {
        let mut history = self.history();
        if let Some(back) = history.back() {
            if snapshot.timestamp_ms / 1000 <= back.timestamp_ms / 1000 {
                return false;
            }
        }
        history.push(snapshot);
        drop(history);

        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        true
    }

    pub fn history(&self) -> MutexGuard<'_, BoundedHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn alert_state(&self) -> MutexGuard<'_, AlertState> {
        self.alert.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 某一时刻的品种目录
#[derive(Debug, Default)]
pub struct SymbolUniverse {
    /// 当前跟踪（接收行情）的现货品种
    listings: HashMap<String, Listing>,
    /// 所有出现过的品种状态，包括已移除的
    states: HashMap<String, Arc<SymbolState>>,
    /// 全部合约品种的资金费率（百分比）
    funding: HashMap<String, Arc<AtomicF64>>,
    history_capacity: usize,
}

/// 一次目录刷新的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub tracked: usize,
    pub futures: usize,
}

impl SymbolUniverse {
    /// 从品种目录构建初始状态
    pub fn from_catalog(catalog: &SymbolCatalog, history_capacity: usize) -> Self {
        let empty = Self {
            history_capacity,
            ..Self::default()
        };
        empty.reconcile(catalog).0
    }

    /// 基于当前目录和新的品种目录构建下一版目录
    pub fn reconcile(&self, catalog: &SymbolCatalog) -> (Self, ReconcileReport) {
        let futures_set: HashSet<&str> = catalog.futures.iter().map(String::as_str).collect();

        let mut states = self.states.clone();
        let mut listings = HashMap::with_capacity(catalog.spot.len());
        let mut added = Vec::new();

        for symbol in &catalog.spot {
            let is_futures = futures_set.contains(symbol.as_str());
            match states.get(symbol) {
                Some(state) => state.set_futures(is_futures),
                None => {
                    states.insert(
                        symbol.clone(),
                        Arc::new(SymbolState::new(symbol.clone(), self.history_capacity, is_futures)),
                    );
                }
            }
            if !self.listings.contains_key(symbol) {
                added.push(symbol.clone());
            }
            listings.insert(
                symbol.clone(),
                Listing { is_futures, funding_refresh_interval: FUNDING_REFRESH_INTERVAL },
            );
        }

        let mut removed: Vec<String> = self
            .listings
            .keys()
            .filter(|s| !listings.contains_key(*s))
            .cloned()
            .collect();
        for symbol in &removed {
            if let Some(state) = states.get(symbol) {
                state.set_futures(false);
            }
        }

        let funding = catalog
            .futures
            .iter()
            .map(|symbol| {
                let rate = self
                    .funding
                    .get(symbol)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(AtomicF64::new(0.0)));
                (symbol.clone(), rate)
            })
            .collect::<HashMap<_, _>>();

        added.sort();
        removed.sort();
        let report = ReconcileReport {
            added,
            removed,
            tracked: listings.len(),
            futures: funding.len(),
        };

        let next = Self {
            listings,
            states,
            funding,
            history_capacity: self.history_capacity,
        };
        (next, report)
    }

    /// 当前跟踪中的品种状态；未跟踪或已移除的返回 `None`
    pub fn tracked(&self, symbol: &str) -> Option<&Arc<SymbolState>> {
        if !self.listings.contains_key(symbol) {
            return None;
        }
        self.states.get(symbol)
    }

    /// 任意出现过的品种状态，包括已移除的
    pub fn state(&self, symbol: &str) -> Option<&Arc<SymbolState>> {
        self.states.get(symbol)
    }

    pub fn listing(&self, symbol: &str) -> Option<Listing> {
        self.listings.get(symbol).copied()
    }

    pub fn tracked_len(&self) -> usize {
        self.listings.len()
    }

    /// 现货成交流需要订阅的品种
    pub fn spot_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.listings.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// 合约成交流需要订阅的品种：同时有现货快照的合约
    pub fn futures_trade_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .listings
            .iter()
            .filter(|(_, listing)| listing.is_futures)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// 资金费率流需要订阅的品种
    pub fn funding_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.funding.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn funding_rate(&self, symbol: &str) -> Option<f64> {
        self.funding.get(symbol).map(|rate| rate.load())
    }

    /// 写入资金费率，未知品种返回 false
    pub fn set_funding_rate(&self, symbol: &str, rate_pct: f64) -> bool {
        match self.funding.get(symbol) {
            Some(slot) => {
                slot.store(rate_pct);
                true
            }
            None => false,
        }
    }

    /// 所有合约的资金费率
    pub fn funding_rates(&self) -> Vec<(String, f64)> {
        self.funding
            .iter()
            .map(|(symbol, rate)| (symbol.clone(), rate.load()))
            .collect()
    }
}

/// 写时复制的目录句柄
#[derive(Debug)]
pub struct SharedUniverse {
    current: RwLock<Arc<SymbolUniverse>>,
}

impl SharedUniverse {
    pub fn new(universe: SymbolUniverse) -> Self {
        Self { current: RwLock::new(Arc::new(universe)) }
    }

    /// 当前目录的快照
    pub fn load(&self) -> Arc<SymbolUniverse> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 用新的品种目录刷新
    ///
    /// 写锁覆盖读旧目录到换入新目录的整个过程，并发的刷新不会互相覆盖。
    pub fn refresh(&self, catalog: &SymbolCatalog) -> ReconcileReport {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let (next, report) = guard.reconcile(catalog);
        *guard = Arc::new(next);
        report
    }
}

/// 去掉计价资产后缀得到的基础币种
pub fn base_symbol(symbol: &str) -> &str {
    symbol.strip_suffix(QUOTE_ASSET).unwrap_or(symbol)
}
