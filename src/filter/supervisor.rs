//! 行情任务监管
//!
//! 每类行情一个任务，对外提供启动、请求停止、等待结束。重启时先停掉旧任务并等待其退出，
//! 再拉起新任务，新旧任务不会同时投递告警。
//! 建流失败的行情记为待重启，由 [`FeedSupervisor::take_pending`] 交还调用方重试。

use super::feed::{FeedReceiver, MarketFeed};
use super::ingest::Ingestor;
use super::universe::SharedUniverse;
use crate::common::{spawn_instrumented, AppError, MarkPriceEvent, Result, TickerEvent, TradeEvent};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

const SUPERVISOR_TARGET: &str = "行情监管";

/// 四类行情
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Ticker,
    SpotTrade,
    FuturesTrade,
    FundingRate,
}

impl FeedKind {
    pub const ALL: [FeedKind; 4] = [
        FeedKind::Ticker,
        FeedKind::SpotTrade,
        FeedKind::FuturesTrade,
        FeedKind::FundingRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Ticker => "ticker",
            FeedKind::SpotTrade => "spot_trade",
            FeedKind::FuturesTrade => "futures_trade",
            FeedKind::FundingRate => "funding_rate",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct FeedTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

pub struct FeedSupervisor {
    feed: Arc<dyn MarketFeed>,
    ingestor: Ingestor,
    universe: Arc<SharedUniverse>,
    tasks: HashMap<FeedKind, FeedTask>,
    /// 应当运行但建流失败的行情
    pending: HashSet<FeedKind>,
}

impl FeedSupervisor {
    pub fn new(feed: Arc<dyn MarketFeed>, ingestor: Ingestor, universe: Arc<SharedUniverse>) -> Self {
        Self {
            feed,
            ingestor,
            universe,
            tasks: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn is_running(&self, kind: FeedKind) -> bool {
        self.tasks
            .get(&kind)
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn is_pending(&self, kind: FeedKind) -> bool {
        self.pending.contains(&kind)
    }

    /// 启动一类行情；已在运行的先停掉。建流失败时记为待重启
    pub async fn start(&mut self, kind: FeedKind) -> Result<()> {
        if self.tasks.contains_key(&kind) {
            self.stop(kind).await;
        }

        match self.spawn_feed(kind).await {
            Ok(task) => {
                self.pending.remove(&kind);
                info!(target: SUPERVISOR_TARGET, feed = %kind, "行情任务已启动");
                self.tasks.insert(kind, task);
                Ok(())
            }
            Err(e) => {
                self.pending.insert(kind);
                warn!(
                    target: SUPERVISOR_TARGET,
                    feed = %kind,
                    error.summary = e.get_error_type_summary(),
                    error.details = %e,
                    "行情建流失败，等待重试"
                );
                Err(e)
            }
        }
    }

    async fn spawn_feed(&self, kind: FeedKind) -> Result<FeedTask> {
        let universe = self.universe.load();
        let ingestor = self.ingestor.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let span = info_span!("feed", kind = kind.as_str());

        let handle = match kind {
            FeedKind::Ticker => {
                let rx = self.feed.ticker_stream().await?;
                spawn_instrumented(
                    run_feed(kind, rx, stop_rx, move |batch: Vec<TickerEvent>| {
                        ingestor.on_ticker_batch(&batch);
                    })
                    .instrument(span),
                )
            }
            FeedKind::SpotTrade => {
                let rx = self.feed.spot_trade_stream(universe.spot_symbols()).await?;
                spawn_instrumented(
                    run_feed(kind, rx, stop_rx, move |event: TradeEvent| {
                        ingestor.on_spot_trade(&event);
                    })
                    .instrument(span),
                )
            }
            FeedKind::FuturesTrade => {
                let rx = self.feed.futures_trade_stream(universe.futures_trade_symbols()).await?;
                spawn_instrumented(
                    run_feed(kind, rx, stop_rx, move |event: TradeEvent| {
                        ingestor.on_futures_trade(&event);
                    })
                    .instrument(span),
                )
            }
            FeedKind::FundingRate => {
                let rx = self.feed.mark_price_stream(universe.funding_symbols()).await?;
                spawn_instrumented(
                    run_feed(kind, rx, stop_rx, move |event: MarkPriceEvent| {
                        ingestor.on_mark_price(&event);
                    })
                    .instrument(span),
                )
            }
        };

        Ok(FeedTask { stop_tx, handle })
    }

    /// 逐个启动四类行情，某一类失败不影响其余的启动，返回第一个错误
    pub async fn start_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for kind in FeedKind::ALL {
            if let Err(e) = self.start(kind).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 发出停止信号，不等待
    pub fn request_stop(&self, kind: FeedKind) {
        if let Some(task) = self.tasks.get(&kind) {
            let _ = task.stop_tx.send(true);
        }
    }

    /// 停止并等待任务退出，返回任务的结束结果
    pub async fn stop(&mut self, kind: FeedKind) -> Option<Result<()>> {
        self.pending.remove(&kind);
        let task = self.tasks.remove(&kind)?;
        let _ = task.stop_tx.send(true);
        let result = join_result(kind, task.handle.await);
        info!(target: SUPERVISOR_TARGET, feed = %kind, "行情任务已停止");
        Some(result)
    }

    /// 同时通知全部任务停止，再一起等待退出
    pub async fn stop_all(&mut self) {
        self.pending.clear();
        for kind in FeedKind::ALL {
            self.request_stop(kind);
        }

        let stopping = self.tasks.drain().map(|(kind, task)| async move {
            (kind, join_result(kind, task.handle.await))
        });
        for (kind, result) in join_all(stopping).await {
            if let Err(e) = result {
                warn!(
                    target: SUPERVISOR_TARGET,
                    feed = %kind,
                    error.summary = e.get_error_type_summary(),
                    error.details = %e,
                    "行情任务停止前已出错"
                );
            }
            info!(target: SUPERVISOR_TARGET, feed = %kind, "行情任务已停止");
        }
    }

    /// 先停掉全部四类行情并等待退出，再全部重新启动
    pub async fn restart_all(&mut self) -> Result<()> {
        info!(target: SUPERVISOR_TARGET, "重启全部行情任务");
        self.stop_all().await;
        self.start_all().await
    }

    /// 收集已经自行结束的任务及其结果
    pub async fn poll_terminated(&mut self) -> Vec<(FeedKind, Result<()>)> {
        let finished: Vec<FeedKind> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(kind, _)| *kind)
            .collect();

        let mut results = Vec::with_capacity(finished.len());
        for kind in finished {
            if let Some(task) = self.tasks.remove(&kind) {
                results.push((kind, join_result(kind, task.handle.await)));
            }
        }
        results
    }

    /// 取出待重启的行情（建流失败的），按固定顺序返回并清空记录
    pub fn take_pending(&mut self) -> Vec<FeedKind> {
        FeedKind::ALL
            .into_iter()
            .filter(|kind| self.pending.remove(kind))
            .collect()
    }
}

fn join_result(kind: FeedKind, joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(AppError::FeedTerminated(format!("{} 任务异常退出: {}", kind, e))),
    }
}

/// 行情任务主循环：收到停止信号正常退出，流出错或结束时返回错误
async fn run_feed<T, F>(
    kind: FeedKind,
    mut rx: FeedReceiver<T>,
    mut stop_rx: watch::Receiver<bool>,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(T),
{
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                info!(target: SUPERVISOR_TARGET, feed = %kind, "收到停止信号");
                return Ok(());
            }
            event = rx.recv() => match event {
                Some(Ok(event)) => handler(event),
                Some(Err(e)) => {
                    error!(
                        target: SUPERVISOR_TARGET,
                        feed = %kind,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "行情流致命错误"
                    );
                    return Err(AppError::FeedTerminated(format!("{}: {}", kind, e)));
                }
                None => {
                    warn!(target: SUPERVISOR_TARGET, feed = %kind, "行情流已结束");
                    return Err(AppError::FeedTerminated(format!("{} 行情流已结束", kind)));
                }
            }
        }
    }
}
