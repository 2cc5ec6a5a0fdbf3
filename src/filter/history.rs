//! 每个品种的有界行情历史
//!
//! 固定容量的环形缓冲区，满了之后淘汰最旧的快照。窗口查询只从最新一条
//! 往回扫描到窗口边界，开销和窗口长度成正比，和总容量无关。

use std::collections::VecDeque;

/// 一次 Ticker 推送形成的行情快照
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    /// 最优卖价
    pub price: f64,
    /// 24h成交量（基础资产）
    pub base_volume: f64,
    /// 24h成交额（计价资产）
    pub quote_volume: f64,
    pub timestamp_ms: i64,
}

impl Snapshot {
    pub fn new(price: f64, base_volume: f64, quote_volume: f64, timestamp_ms: i64) -> Self {
        Self { price, base_volume, quote_volume, timestamp_ms }
    }
}

/// 窗口查询结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// 窗口内价格最低的快照（同价取更早的）
    pub min: Snapshot,
    /// 窗口内价格最高的快照（同价取更早的）
    pub max: Snapshot,
    /// 成交额增幅的基准快照
    pub baseline: Snapshot,
}

#[derive(Debug, Clone)]
pub struct BoundedHistory {
    capacity: usize,
    entries: VecDeque<Snapshot>,
}

impl BoundedHistory {
    /// 创建空的历史缓冲区
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// 创建带一条零值占位快照的历史缓冲区，保证 `back()` 始终有值
    pub fn seeded(capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        history.push(Snapshot::default());
        history
    }

    /// 追加快照，满容量时先淘汰最旧的一条
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// 最近一次写入的快照
    pub fn back(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    pub fn front(&self) -> Option<&Snapshot> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 计算 `[cutoff_ms, now]` 窗口内的最低价、最高价和成交额基准
    ///
    /// 从最新一条往回扫，遇到第一条 `timestamp < cutoff_ms` 的快照即停止，
    /// 这条边界快照不参与价格比较。窗口内出现零价格（冷启动占位）时返回 `None`。
    ///
    /// 基准取边界快照；边界不存在或是零价格占位时，退回到窗口内最早的一条。
    pub fn window_min_max(&self, cutoff_ms: i64) -> Option<WindowStats> {
        let mut min: Option<Snapshot> = None;
        let mut max: Option<Snapshot> = None;
        let mut oldest_in_window: Option<Snapshot> = None;
        let mut boundary: Option<Snapshot> = None;

        for snapshot in self.entries.iter().rev() {
            if snapshot.timestamp_ms < cutoff_ms {
                boundary = Some(*snapshot);
                break;
            }

            if snapshot.price == 0.0 {
                return None;
            }

            // 倒序扫描，同价时用更早的覆盖
            min = match min {
                Some(current) if current.price < snapshot.price => Some(current),
                _ => Some(*snapshot),
            };
            max = match max {
                Some(current) if current.price > snapshot.price => Some(current),
                _ => Some(*snapshot),
            };
            oldest_in_window = Some(*snapshot);
        }

        let baseline = match boundary {
            Some(b) if b.price != 0.0 => b,
            _ => oldest_in_window?,
        };

        Some(WindowStats { min: min?, max: max?, baseline })
    }
}
