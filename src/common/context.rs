//! 任务派生时的追踪上下文传播
//!
//! 行情任务在重启时会被反复派生，统一从这里派生可以保证
//! 新任务继承调用方的 `Span`，日志里能关联到是哪次重启拉起的任务。

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

/// 派生一个继承了当前上下文的后台任务。
///
/// **严禁**在业务代码中手动调用 `future.instrument(Span::current())`。
pub fn spawn_instrumented<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let current_span = Span::current();
    tokio::spawn(future.instrument(current_span))
}
