//! 链路指标
//!
//! 原子计数器，IO 线程写入，任何线程都可以无锁读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路实时指标
///
/// # 使用示例
///
/// ```rust
/// use davinci_driver::LinkMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = LinkMetrics::new();
/// metrics.rx_messages.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.rx_messages, 1);
/// ```
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 接收的字节数
    pub rx_bytes: AtomicU64,
    /// 成功应用的消息/帧数
    pub rx_messages: AtomicU64,
    /// 语法或结构错误的消息数（含长度错误的二进制帧）
    pub rx_bad_messages: AtomicU64,
    /// 接收超时次数
    pub rx_timeouts: AtomicU64,
    /// 其他可恢复的接收错误
    pub rx_errors: AtomicU64,
    /// 发送的消息/帧数
    pub tx_messages: AtomicU64,
    /// 发送失败次数
    pub tx_errors: AtomicU64,
    /// 当前连续接收失败次数
    pub consecutive_failures: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_messages: self.rx_messages.load(Ordering::Relaxed),
            rx_bad_messages: self.rx_bad_messages.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_messages: self.tx_messages.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.rx_messages.store(0, Ordering::Relaxed);
        self.rx_bad_messages.store(0, Ordering::Relaxed);
        self.rx_timeouts.store(0, Ordering::Relaxed);
        self.rx_errors.store(0, Ordering::Relaxed);
        self.tx_messages.store(0, Ordering::Relaxed);
        self.tx_errors.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_bytes: u64,
    pub rx_messages: u64,
    pub rx_bad_messages: u64,
    pub rx_timeouts: u64,
    pub rx_errors: u64,
    pub tx_messages: u64,
    pub tx_errors: u64,
    pub consecutive_failures: u64,
}

impl MetricsSnapshot {
    /// 接收失败（超时 + 错误 + 坏消息）占全部接收尝试的百分比
    pub fn rx_failure_rate(&self) -> f64 {
        let failures = self.rx_timeouts + self.rx_errors + self.rx_bad_messages;
        let total = failures + self.rx_messages;
        if total == 0 {
            return 0.0;
        }
        (failures as f64 / total as f64) * 100.0
    }
}

/// 链路健康度（由连续接收失败次数决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LinkHealth {
    #[default]
    Nominal,
    /// 连续失败达到低阈值
    Degraded,
    /// 连续失败达到高阈值
    Lost,
}

impl LinkHealth {
    pub fn from_failures(consecutive: u64, low: u32, high: u32) -> Self {
        if consecutive >= u64::from(high) {
            Self::Lost
        } else if consecutive >= u64::from(low) {
            Self::Degraded
        } else {
            Self::Nominal
        }
    }
}
