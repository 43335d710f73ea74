//! # Davinci Driver
//!
//! 单个控制器的设备驱动，包括：
//! - IO 线程管理（每个驱动一个后台线程）
//! - 共享机器人状态与脏标志
//! - 文本/二进制两种链路
//! - 截止时间监督与链路统计
//!
//! 多控制器的整机接口见 `davinci-client`。

mod builder;
pub mod context;
mod driver;
mod error;
pub mod lifecycle;
pub mod link;
pub mod liveness;
pub mod metrics;
pub mod pipeline;
pub mod state;
pub mod supervisor;

pub use builder::{BinaryTable, DriverBuilder, Variant};
pub use context::DriverContext;
pub use driver::Driver;
pub use error::DriverError;
pub use lifecycle::{AtomicLinkState, LinkState};
pub use link::{BinaryLink, Link, TextLink};
pub use liveness::FeedbackMonitor;
pub use metrics::{LinkHealth, LinkMetrics, MetricsSnapshot};
pub use pipeline::{LoopExit, PipelineConfig, io_loop};
pub use state::{JointRecord, MotorRecord, RobotSnapshot, SharedState};
pub use supervisor::DeadlineSupervisor;
