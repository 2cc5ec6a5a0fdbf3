//! 实时行情过滤引擎
//!
//! ## 数据流
//! 1.  **行情任务**: 四类行情各自一个任务，把事件交给 `Ingestor`。
//! 2.  **Ingestor**: 校验事件、更新品种状态，必要时经 `classifier` 产生告警。
//! 3.  **Dispatcher**: 按频道开关过滤后交给投递任务，投递任务调用外部通知接口。
//! 4.  **运维指令**: 反方向修改 `ThresholdStore` 与引擎状态，和行情任务并发。

pub mod classifier;
pub mod command;
pub mod dispatcher;
pub mod feed;
pub mod format;
pub mod history;
pub mod ingest;
pub mod supervisor;
pub mod thresholds;
pub mod universe;


pub use classifier::{AlertState, Direction, TickerAlert};
pub use command::{Command, CommandError};
pub use dispatcher::{Dispatcher, NotificationSink, Outgoing};
pub use feed::{BinanceMarketFeed, FeedReceiver, MarketFeed};
pub use history::{BoundedHistory, Snapshot, WindowStats};
pub use ingest::{Ingestor, Market, Side, TradeAlert};
pub use supervisor::{FeedKind, FeedSupervisor};
pub use thresholds::{Channel, ThresholdField, ThresholdStore};
pub use universe::{ReconcileReport, SharedUniverse, SymbolState, SymbolUniverse};

use crate::common::{spawn_instrumented, AppError, FilterConfig, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

const ENGINE_TARGET: &str = "过滤引擎";

/// 过滤引擎
pub struct MarketFilter {
    thresholds: Arc<ThresholdStore>,
    universe: Arc<SharedUniverse>,
    dispatcher: Dispatcher,
    ingestor: Ingestor,
    feed: Arc<dyn MarketFeed>,
    supervisor: Mutex<FeedSupervisor>,
    zone: Tz,
}

impl MarketFilter {
    /// 构建引擎并启动投递任务，行情任务需另外调用 [`MarketFilter::start_feeds`]
    ///
    /// 拿不到初始品种目录时拒绝启动。
    #[instrument(target = "过滤引擎", skip_all, err)]
    pub async fn new(
        config: &FilterConfig,
        feed: Arc<dyn MarketFeed>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let catalog = feed.catalog().await.map_err(|e| {
            AppError::InitializationError(format!("无法获取初始品种目录: {}", e))
        })?;
        if catalog.spot.is_empty() {
            return Err(AppError::InitializationError("初始品种目录为空".to_string()));
        }

        let universe = Arc::new(SharedUniverse::new(SymbolUniverse::from_catalog(
            &catalog,
            config.history.capacity,
        )));
        let thresholds = Arc::new(ThresholdStore::from_config(&config.thresholds));
        let zone = config.display_time_zone()?;

        let (dispatcher, outgoing_rx) = Dispatcher::new(thresholds.clone());
        spawn_instrumented(dispatcher::run_delivery_task(outgoing_rx, sink));

        let ingestor = Ingestor::new(
            thresholds.clone(),
            universe.clone(),
            dispatcher.clone(),
            zone,
            config.exchange.excluded_futures_prefixes.clone(),
        );
        let supervisor = FeedSupervisor::new(feed.clone(), ingestor.clone(), universe.clone());

        info!(
            target: ENGINE_TARGET,
            spot = catalog.spot.len(),
            futures = catalog.futures.len(),
            "过滤引擎初始化完成"
        );

        Ok(Self {
            thresholds,
            universe,
            dispatcher,
            ingestor,
            feed,
            supervisor: Mutex::new(supervisor),
            zone,
        })
    }

    pub fn thresholds(&self) -> &Arc<ThresholdStore> {
        &self.thresholds
    }

    /// 当前品种目录的快照
    pub fn universe(&self) -> Arc<SymbolUniverse> {
        self.universe.load()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// 在 SYSTEM 频道发送启动通知
    pub fn announce_started(&self, now: DateTime<Utc>) {
        self.dispatcher
            .deliver(Channel::System, format::started_banner(now, &self.zone));
    }

    /// 启动四类行情任务
    pub async fn start_feeds(&self) -> Result<()> {
        self.supervisor.lock().await.start_all().await
    }

    /// 停掉全部行情任务并等待退出后重新启动
    pub async fn restart_feeds(&self) -> Result<()> {
        self.supervisor.lock().await.restart_all().await
    }

    pub async fn stop_feeds(&self) {
        self.supervisor.lock().await.stop_all().await;
    }

    pub async fn is_feed_running(&self, kind: FeedKind) -> bool {
        self.supervisor.lock().await.is_running(kind)
    }

    /// 检查自行结束的行情任务，记录原因后单独重启，返回被重启的行情
    ///
    /// 上次重启时建流失败的行情也在这里重试，直到启动成功。
    pub async fn restart_terminated_feeds(&self) -> Vec<FeedKind> {
        let mut supervisor = self.supervisor.lock().await;
        let terminated = supervisor.poll_terminated().await;

        let mut due = supervisor.take_pending();
        for (kind, result) in terminated {
            match result {
                Ok(()) => warn!(target: ENGINE_TARGET, feed = %kind, "行情任务意外正常退出"),
                Err(e) => error!(
                    target: ENGINE_TARGET,
                    feed = %kind,
                    error.summary = e.get_error_type_summary(),
                    error.details = %e,
                    "行情任务因致命错误退出"
                ),
            }
            if !due.contains(&kind) {
                due.push(kind);
            }
        }

        let mut restarted = Vec::with_capacity(due.len());
        for kind in due {
            match supervisor.start(kind).await {
                Ok(()) => restarted.push(kind),
                Err(e) => error!(
                    target: ENGINE_TARGET,
                    feed = %kind,
                    error.summary = e.get_error_type_summary(),
                    error.details = %e,
                    "行情任务重启失败，下次检查时重试"
                ),
            }
        }
        restarted
    }

    /// 建流失败、等待重试的行情
    pub async fn is_feed_pending(&self, kind: FeedKind) -> bool {
        self.supervisor.lock().await.is_pending(kind)
    }

    /// 重新拉取品种目录并换入新目录
    ///
    /// 只替换目录，不重新订阅成交流；新品种的成交要等下一次重启行情后才会接入。
    pub async fn refresh_universe(&self) -> Result<ReconcileReport> {
        let catalog = self.feed.catalog().await.map_err(|e| {
            warn!(
                target: ENGINE_TARGET,
                { error.summary = e.get_error_type_summary(),
                error.details = %e },
                "刷新品种目录失败"
            );
            e
        })?;
        if catalog.spot.is_empty() {
            return Err(AppError::ApiError("品种目录为空，保留当前目录".to_string()));
        }

        let report = self.universe.refresh(&catalog);
        info!(
            target: ENGINE_TARGET,
            added = report.added.len(),
            removed = report.removed.len(),
            tracked = report.tracked,
            futures = report.futures,
            "品种目录已刷新"
        );
        Ok(report)
    }
}
