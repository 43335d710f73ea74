//! 驱动层错误类型定义

use davinci_protocol::ProtocolError;
use davinci_transport::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 关节/电机表尚未建立（握手未完成）
    #[error("Robot state not initialized")]
    NotInitialized,

    /// 关节或电机索引越界
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unknown motor: {0}")]
    UnknownMotor(String),

    /// 驱动已关闭（IO 线程已退出，不支持重连）
    #[error("Driver closed")]
    Closed,

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 无效配置
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
