//! IO 循环
//!
//! 每个驱动实例一个后台线程。每次迭代：
//!
//! 1. 入站：读取并应用所有可用的数据（文本）或一次有截止时间的接收（二进制）
//! 2. 出站：在锁内取出脏数据，锁外编码并发送
//! 3. 让出固定的 tick 间隔，同时作为停止信号的检查点
//!
//! 停止信号是 `is_running` 标志加上传输层的取消句柄：关闭时先清除标志，
//! 再唤醒可能阻塞中的接收。接收被取消后循环检查标志并退出，
//! 因此无论取消发生在检查之前还是之后都会被观察到。

use crate::context::DriverContext;
use crate::lifecycle::LinkState;
use crate::link::Link;
use crate::supervisor::{DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};
use davinci_transport::TransportError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// Pipeline 配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 每次迭代结束后的让出间隔（毫秒）
    pub tick_interval_ms: u64,
    /// 有截止时间的接收超时（毫秒，二进制变体）
    pub receive_timeout_ms: u64,
    /// 建立连接超时（毫秒，文本变体）
    pub connect_timeout_ms: u64,
    /// 发送超时（毫秒）
    pub send_timeout_ms: u64,
    /// 关闭时等待 IO 线程退出的超时（毫秒）
    pub join_timeout_ms: u64,
    /// 连续接收失败的低阈值（诊断）
    pub low_failure_threshold: u32,
    /// 连续接收失败的高阈值（诊断）
    pub high_failure_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2,
            receive_timeout_ms: 2,
            connect_timeout_ms: 1000,
            send_timeout_ms: 100,
            join_timeout_ms: 2000,
            low_failure_threshold: DEFAULT_LOW_THRESHOLD,
            high_failure_threshold: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// IO 循环退出原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// 收到停止信号
    Stopped,
    /// 对端正常关闭连接
    PeerClosed,
    /// 致命传输错误
    Fatal(String),
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

/// IO 循环主体
///
/// 退出时关闭链路、把状态置为 `Closed` 并发布退出原因。
pub fn io_loop(
    mut link: impl Link,
    ctx: Arc<DriverContext>,
    is_running: Arc<AtomicBool>,
    config: PipelineConfig,
) -> LoopExit {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("IO thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set IO thread priority: {:?}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    info!("{} IO loop started", link.variant());
    let tick = config.tick_interval();

    let exit = loop {
        // Acquire: 与关闭时的 Release 配对
        if !is_running.load(Ordering::Acquire) {
            break LoopExit::Stopped;
        }

        if let Err(e) = link.inbound(&ctx)
            && let Some(exit) = classify(e, &is_running)
        {
            break exit;
        }

        if let Err(e) = link.outbound(&ctx)
            && let Some(exit) = classify(e, &is_running)
        {
            break exit;
        }

        trace!("IO loop tick");
        spin_sleep::sleep(tick);
    };

    link.shutdown();
    ctx.link_state.set(LinkState::Closed);
    ctx.exit_reason.store(Some(Arc::new(exit.clone())));

    match &exit {
        LoopExit::Stopped => info!("{} IO loop stopped", link.variant()),
        LoopExit::PeerClosed => warn!("{} link closed by peer", link.variant()),
        LoopExit::Fatal(reason) => error!("{} IO loop terminated: {}", link.variant(), reason),
    }
    exit
}

/// 把链路返回的错误映射为退出原因；`None` 表示继续循环
fn classify(error: TransportError, is_running: &AtomicBool) -> Option<LoopExit> {
    match error {
        TransportError::Cancelled => {
            if is_running.load(Ordering::Acquire) {
                trace!("Spurious cancellation while running");
                None
            } else {
                Some(LoopExit::Stopped)
            }
        },
        TransportError::Closed => Some(LoopExit::PeerClosed),
        e => Some(LoopExit::Fatal(e.to_string())),
    }
}
