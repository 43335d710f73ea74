//! # Davinci Transport Layer
//!
//! 传输层抽象：面向连接的字节流（TCP，文本变体）与数据报（UDP，二进制变体）。
//!
//! 所有接收操作都有截止时间，并且可以被另一个线程通过 [`Interrupter`] 取消，
//! 这样 IO 线程在关闭时不会无限期阻塞在 socket 上。

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

mod reactor;
pub mod tcp;
pub mod udp;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockPeer, MockTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    /// 截止时间内没有数据（可恢复）
    #[error("Operation timed out")]
    Timeout,
    /// 被 [`Interrupter`] 取消
    #[error("Operation cancelled")]
    Cancelled,
    /// 截止时间到达时只写出了前 `written` 个字节（字节流）
    #[error("Send incomplete: {written} bytes written before deadline")]
    Partial { written: usize },
    /// 对端关闭了连接
    #[error("Connection closed by peer")]
    Closed,
    #[error("Transport not connected")]
    NotConnected,
}

impl TransportError {
    /// 是否为不可恢复的错误（连接已不可用）
    ///
    /// 超时、取消以及数据报的 ICMP 拒绝都不算致命错误。
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Closed | TransportError::NotConnected => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            TransportError::Timeout
            | TransportError::Partial { .. }
            | TransportError::Cancelled => false,
        }
    }
}

/// 可唤醒阻塞中的接收操作的对象
pub trait Interrupt: Send + Sync {
    fn interrupt(&self) -> io::Result<()>;
}

impl Interrupt for mio::Waker {
    fn interrupt(&self) -> io::Result<()> {
        self.wake()
    }
}

/// 取消句柄
///
/// 可以跨线程克隆与调用。被取消的接收操作返回 [`TransportError::Cancelled`]。
#[derive(Clone)]
pub struct Interrupter {
    inner: Arc<dyn Interrupt>,
}

impl Interrupter {
    pub fn new(inner: Arc<dyn Interrupt>) -> Self {
        Self { inner }
    }

    /// 唤醒正在等待的接收操作
    pub fn interrupt(&self) {
        if let Err(e) = self.inner.interrupt() {
            warn!("Failed to interrupt transport: {}", e);
        }
    }
}

impl std::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupter").finish_non_exhaustive()
    }
}

/// 传输层 trait
///
/// 由 IO 线程独占持有。除 [`Transport::interrupter`] 返回的句柄外，
/// 不允许其他线程访问。
pub trait Transport: Send {
    /// 发送一条完整消息（字节流写完全部字节，数据报发送一个报文）
    ///
    /// # 错误
    /// - `TransportError::Timeout`: 截止时间内一个字节也没有发出
    /// - `TransportError::Partial`: 字节流只写出了一部分，剩余部分由调用者负责续写
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// 在 `timeout` 内接收数据，返回写入 `buf` 的字节数
    ///
    /// # 错误
    /// - `TransportError::Timeout`: 截止时间内没有数据
    /// - `TransportError::Cancelled`: 被 [`Interrupter`] 取消
    /// - `TransportError::Closed`: 对端关闭
    fn receive_timeout(&mut self, buf: &mut [u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// 非阻塞接收：没有待处理数据时返回 `Ok(None)`
    fn try_receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        match self.receive_timeout(buf, Duration::ZERO) {
            Ok(n) => Ok(Some(n)),
            Err(TransportError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 获取取消句柄
    fn interrupter(&self) -> Interrupter;

    /// 关闭传输（幂等）
    fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn receive_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).receive_timeout(buf, timeout)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        (**self).try_receive(buf)
    }

    fn interrupter(&self) -> Interrupter {
        (**self).interrupter()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        (**self).shutdown()
    }
}
