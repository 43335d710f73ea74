//! 驱动上下文：IO 线程与客户端线程共享的全部状态

use crate::lifecycle::AtomicLinkState;
use crate::liveness::FeedbackMonitor;
use crate::metrics::LinkMetrics;
use crate::pipeline::LoopExit;
use crate::state::SharedState;
use arc_swap::ArcSwapOption;

#[derive(Debug, Default)]
pub struct DriverContext {
    /// 关节/电机状态与脏标志
    pub state: SharedState,
    pub metrics: LinkMetrics,
    pub feedback: FeedbackMonitor,
    pub link_state: AtomicLinkState,
    /// IO 线程的退出原因（运行中为 `None`）
    pub exit_reason: ArcSwapOption<LoopExit>,
}

impl DriverContext {
    pub fn new() -> Self {
        Self::default()
    }
}
