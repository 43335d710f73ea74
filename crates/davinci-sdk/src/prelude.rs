//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use davinci_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use crate::client::{Davinci, JointStates, RobotConfig};

// 驱动层
pub use crate::driver::{
    BinaryTable, Driver, DriverBuilder, LinkHealth, LinkState, LoopExit, PipelineConfig, Variant,
};

// 错误类型
pub use crate::client::{ClientError, ConfigError};
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;
pub use crate::transport::TransportError;
