use crate::common::Result;
use crate::filter::{Channel, NotificationSink};
use async_trait::async_trait;
use tracing::info;

/// 把告警写进日志的投递方式
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn post(&self, channel: Channel, text: &str) -> Result<()> {
        info!(target: "告警输出", channel = %channel, "{}", text);
        Ok(())
    }
}
