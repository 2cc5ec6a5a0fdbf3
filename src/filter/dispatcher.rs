//! 告警投递
//!
//! 热路径只做频道开关判断并把消息放进无界通道，真正的网络发送在独立的投递任务里完成，
//! 判定逻辑不会因为外部接口变慢而阻塞。投递失败只记日志，不重试。

use super::thresholds::{Channel, ThresholdStore};
use crate::common::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DISPATCH_TARGET: &str = "告警投递";

/// 外部通知接口
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, channel: Channel, text: &str) -> Result<()>;
}

/// 等待投递的消息
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub channel: Channel,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    thresholds: Arc<ThresholdStore>,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Dispatcher {
    /// 创建分发器，返回的接收端交给 [`run_delivery_task`]
    pub fn new(thresholds: Arc<ThresholdStore>) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { thresholds, tx }, rx)
    }

    /// SYSTEM 始终投递；其余频道需要总开关和自身开关同时打开
    pub fn should_deliver(&self, channel: Channel) -> bool {
        channel == Channel::System
            || (self.thresholds.channel_enabled(Channel::All) && self.thresholds.channel_enabled(channel))
    }

    /// 过滤并交给投递任务，被静音或投递任务已退出时返回 false
    pub fn deliver(&self, channel: Channel, text: String) -> bool {
        if !self.should_deliver(channel) {
            debug!(target: DISPATCH_TARGET, %channel, "频道已静音，丢弃消息");
            return false;
        }

        if self.tx.send(Outgoing { channel, text }).is_err() {
            warn!(target: DISPATCH_TARGET, %channel, "投递任务已退出，消息被丢弃");
            return false;
        }
        true
    }
}

/// 投递任务：逐条调用外部接口，直到所有分发器都被丢弃
pub async fn run_delivery_task(mut rx: mpsc::UnboundedReceiver<Outgoing>, sink: Arc<dyn NotificationSink>) {
    info!(target: DISPATCH_TARGET, "告警投递任务启动");
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.post(message.channel, &message.text).await {
            warn!(
                target: DISPATCH_TARGET,
                channel = %message.channel,
                error.summary = e.get_error_type_summary(),
                error.details = %e,
                "告警投递失败"
            );
        }
    }
    info!(target: DISPATCH_TARGET, "告警投递任务退出");
}
