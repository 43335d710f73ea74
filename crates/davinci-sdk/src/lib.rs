//! Davinci SDK - Davinci 手术机器人控制器驱动
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 流式 JSON 编解码与定长二进制帧
//! - **传输层** (`transport`): TCP/UDP 传输，可取消的有截止时间接收
//! - **驱动层** (`driver`): 单个控制器的 IO 线程、共享状态与链路监督
//! - **客户端层** (`client`): 多控制器整机接口与 TOML 配置
//!
//! # 快速开始
//!
//! ```no_run
//! use davinci_sdk::prelude::*;
//! use std::time::Duration;
//!
//! davinci_sdk::init_logging("info").ok();
//!
//! let config = RobotConfig::load("davinci.toml")?;
//! let robot = Davinci::from_config(&config)?;
//! robot.connect(Duration::from_secs(10))?;
//! println!("{:?}", robot.read()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use davinci_client as client;
pub use davinci_driver as driver;
pub use davinci_protocol as protocol;
pub use davinci_transport as transport;

mod logging;
pub mod prelude;

pub use logging::init_logging;

pub use client::{ClientError, ConfigError, Davinci, RobotConfig};
pub use driver::{Driver, DriverBuilder, DriverError};
pub use protocol::ProtocolError;
pub use transport::TransportError;
