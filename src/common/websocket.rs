//! 币安 WebSocket 行情流读取
//!
//! 每条连接对应一个读取任务，把解析后的事件送进 mpsc 通道。
//! 这里不做重连：连接断开、协议错误、握手或读取超时都以 `Err` 送给下游，
//! 由行情任务按致命错误处理。下游丢弃接收端时读取任务自行退出。

use crate::common::{AppError, Result};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

const WEBSOCKET_TARGET: &str = "行情连接";

/// 连接超时与保活参数
#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    /// 握手（含 TCP/TLS）最长等待时间
    pub connect: Duration,
    /// 任意帧（含 Pong）之间的最长静默时间
    pub read: Duration,
    /// 主动发送 Ping 的间隔，保证安静的行情流也有回包
    pub ping_interval: Duration,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            read: Duration::from_secs(60),
            ping_interval: Duration::from_secs(20),
        }
    }
}

/// 构建组合流 URL，例如 `wss://fstream.binance.com/stream?streams=a@aggTrade/b@aggTrade`
pub fn combined_stream_url(base: &str, streams: &[String]) -> Result<Url> {
    Ok(Url::parse(&format!("{}/stream?streams={}", base, streams.join("/")))?)
}

/// 构建单流 URL，例如 `wss://stream.binance.com:9443/ws/!ticker@arr`
pub fn single_stream_url(base: &str, stream: &str) -> Result<Url> {
    Ok(Url::parse(&format!("{}/ws/{}", base, stream))?)
}

/// 把品种列表按单连接容量切分成若干组合流 URL
pub fn chunked_stream_urls(
    base: &str,
    symbols: &[String],
    stream_suffix: &str,
    streams_per_connection: usize,
) -> Result<Vec<Url>> {
    symbols
        .chunks(streams_per_connection.max(1))
        .map(|chunk| {
            let streams: Vec<String> = chunk
                .iter()
                .map(|s| format!("{}@{}", s.to_lowercase(), stream_suffix))
                .collect();
            combined_stream_url(base, &streams)
        })
        .collect()
}

/// 派生一个连接读取任务
///
/// `M` 是单条文本帧的 JSON 结构，`map` 把它转换成送往下游的事件。
/// 无法解析的文本帧（订阅确认等）只记 trace 日志后跳过。
pub fn spawn_stream_reader<M, E, F>(
    url: Url,
    label: String,
    tx: mpsc::Sender<Result<E>>,
    map: F,
) -> JoinHandle<()>
where
    M: DeserializeOwned + Send,
    E: Send + 'static,
    F: Fn(M) -> E + Send + 'static,
{
    spawn_stream_reader_with(url, label, tx, map, StreamTimeouts::default())
}

/// 同 [`spawn_stream_reader`]，可指定超时参数
pub fn spawn_stream_reader_with<M, E, F>(
    url: Url,
    label: String,
    tx: mpsc::Sender<Result<E>>,
    map: F,
    timeouts: StreamTimeouts,
) -> JoinHandle<()>
where
    M: DeserializeOwned + Send,
    E: Send + 'static,
    F: Fn(M) -> E + Send + 'static,
{
    tokio::spawn(async move {
        let error = read_stream::<M, E, F>(&url, &label, &tx, map, timeouts).await;
        if let Some(e) = error {
            warn!(target: WEBSOCKET_TARGET, %label, error.summary = e.get_error_type_summary(), error.details = %e, "行情连接终止");
            // 下游已退出时发送失败无需处理
            let _ = tx.send(Err(e)).await;
        }
    })
}

/// 读取直到出错或下游关闭；下游主动关闭返回 `None`
async fn read_stream<M, E, F>(
    url: &Url,
    label: &str,
    tx: &mpsc::Sender<Result<E>>,
    map: F,
    timeouts: StreamTimeouts,
) -> Option<AppError>
where
    M: DeserializeOwned + Send,
    F: Fn(M) -> E,
{
    info!(target: WEBSOCKET_TARGET, %label, "正在连接WebSocket");
    let (mut ws_stream, _) = match tokio::time::timeout(timeouts.connect, connect_async(url.clone())).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Some(e.into()),
        Err(_) => {
            return Some(AppError::WebSocketError(format!(
                "{} 连接尝试超过 {} 秒未响应，已超时",
                label,
                timeouts.connect.as_secs_f64()
            )));
        }
    };
    info!(target: WEBSOCKET_TARGET, %label, "WebSocket连接已建立");

    let mut ping = tokio::time::interval_at(Instant::now() + timeouts.ping_interval, timeouts.ping_interval);
    let mut deadline = Instant::now() + timeouts.read;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(target: WEBSOCKET_TARGET, %label, "下游已关闭，断开连接");
                let _ = ws_stream.close(None).await;
                return None;
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Some(AppError::WebSocketError(format!(
                    "{} 超过 {} 秒未收到任何数据，已超时",
                    label,
                    timeouts.read.as_secs_f64()
                )));
            }
            _ = ping.tick() => {
                if let Err(e) = ws_stream.send(Message::Ping(Vec::new())).await {
                    return Some(e.into());
                }
            }
            msg = ws_stream.next() => {
                if matches!(msg, Some(Ok(_))) {
                    deadline = Instant::now() + timeouts.read;
                }
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<M>(&text) {
                        Ok(parsed) => {
                            if tx.send(Ok(map(parsed))).await.is_err() {
                                return None;
                            }
                        }
                        Err(e) => {
                            trace!(target: WEBSOCKET_TARGET, %label, error = %e, "忽略无法解析的消息");
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = ws_stream.send(Message::Pong(payload)).await {
                            return Some(e.into());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Some(AppError::WebSocketError(format!("{} 连接被服务端关闭: {:?}", label, frame)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some(e.into()),
                    None => {
                        return Some(AppError::WebSocketError(format!("{} 连接已结束", label)));
                    }
                }
            }
        }
    }
}
