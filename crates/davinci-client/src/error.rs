//! 客户端层错误类型

use davinci_driver::DriverError;
use thiserror::Error;

/// 配置文件错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 整机接口错误
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 在截止时间内未能连接并初始化全部控制器
    #[error("Timed out waiting for controllers")]
    Timeout,

    #[error("Robot not initialized")]
    NotInitialized,

    #[error("No motor \"{0}\" connected")]
    UnknownMotor(String),

    #[error("Expected {expected} setpoints, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
