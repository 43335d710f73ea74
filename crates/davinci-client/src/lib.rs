//! # Davinci Client
//!
//! 整机接口：一台机器人由多个嵌入式控制器组成，每个控制器一个 [`Driver`](davinci_driver::Driver)。
//! [`Davinci`] 把它们的关节/电机表按控制器顺序拼接成一个整体。

pub mod config;
mod error;
pub mod robot;

pub use config::{ControllerConfig, RobotConfig, VariantKind};
pub use error::{ClientError, ConfigError};
pub use robot::{Davinci, JointStates};
