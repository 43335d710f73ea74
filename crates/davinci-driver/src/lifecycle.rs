//! 连接生命周期状态
//!
//! `Disconnected → Connecting → Connected → Closed`，其中 `Closed` 是终态。
//! “已初始化”不属于这里：它由共享状态中的关节表是否建立决定。

use std::sync::atomic::{AtomicU8, Ordering};

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LinkState {
    /// 未连接（初始状态，连接失败后回到此状态）
    #[default]
    Disconnected = 0,
    /// 正在建立传输连接
    Connecting = 1,
    /// 传输已建立，IO 线程运行中
    Connected = 2,
    /// IO 线程已退出或驱动已关闭（终态，不支持重连）
    Closed = 3,
}

impl LinkState {
    /// 从 u8 转换
    ///
    /// 无效值视为 `Closed`。
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Closed,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 链路状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicLinkState {
    inner: AtomicU8,
}

impl AtomicLinkState {
    pub fn new(state: LinkState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LinkState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 比较并交换，失败时返回当前状态
    pub fn transition(&self, from: LinkState, to: LinkState) -> Result<LinkState, LinkState> {
        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(LinkState::from_u8)
            .map_err(LinkState::from_u8)
    }
}
