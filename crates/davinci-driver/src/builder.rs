//! Builder 模式实现
//!
//! 提供链式构造 [`Driver`] 实例的便捷方式。

use crate::driver::Driver;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use davinci_protocol::{DEFAULT_BINARY_JOINT_NAMES, MAX_PACKED_FLAGS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// 二进制变体的静态关节/电机表
///
/// 设备不提供握手，关节数 `J` 由 `joint_names` 的长度决定，必须与控制器固件一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryTable {
    pub joint_names: Vec<String>,
    /// 电机名（为空时与关节名相同）
    pub motor_names: Vec<String>,
    /// 电机的初始使能状态
    pub motors_enabled: bool,
    /// 本地 UDP 端口（默认与设备端口相同）
    pub local_port: Option<u16>,
}

impl Default for BinaryTable {
    fn default() -> Self {
        Self {
            joint_names: DEFAULT_BINARY_JOINT_NAMES.iter().map(|s| s.to_string()).collect(),
            motor_names: Vec::new(),
            motors_enabled: true,
            local_port: None,
        }
    }
}

impl BinaryTable {
    /// 实际使用的电机名
    pub fn motors(&self) -> &[String] {
        if self.motor_names.is_empty() {
            &self.joint_names
        } else {
            &self.motor_names
        }
    }

    /// # 错误
    /// - `DriverError::InvalidConfig`: 没有关节，或电机数超过一个位图字节的容量
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.joint_names.is_empty() {
            return Err(DriverError::InvalidConfig(
                "binary table has no joints".to_string(),
            ));
        }
        if self.motors().len() > MAX_PACKED_FLAGS {
            return Err(DriverError::InvalidConfig(format!(
                "binary table has {} motors (max {})",
                self.motors().len(),
                MAX_PACKED_FLAGS
            )));
        }
        Ok(())
    }
}

/// 协议变体
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Variant {
    /// 流式 JSON over TCP，关节表由握手建立
    #[default]
    Text,
    /// 定长帧 over UDP，关节表静态配置
    Binary(BinaryTable),
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Driver Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use davinci_driver::{BinaryTable, DriverBuilder, PipelineConfig};
///
/// // 文本变体，默认配置
/// let driver = DriverBuilder::new("192.168.0.10:8080".parse().unwrap())
///     .build()
///     .unwrap();
///
/// // 二进制变体，自定义接收超时
/// let config = PipelineConfig {
///     receive_timeout_ms: 5,
///     ..Default::default()
/// };
/// let driver = DriverBuilder::new("192.168.0.11:9000".parse().unwrap())
///     .binary(BinaryTable::default())
///     .pipeline_config(config)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    endpoint: SocketAddr,
    name: Option<String>,
    variant: Variant,
    pipeline_config: Option<PipelineConfig>,
}

impl DriverBuilder {
    /// 创建新的 Builder（默认文本变体）
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            name: None,
            variant: Variant::Text,
            pipeline_config: None,
        }
    }

    /// 驱动名称（日志与线程名，默认为设备地址）
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn text(mut self) -> Self {
        self.variant = Variant::Text;
        self
    }

    pub fn binary(mut self, table: BinaryTable) -> Self {
        self.variant = Variant::Binary(table);
        self
    }

    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    /// 构建驱动（不连接）
    ///
    /// # 错误
    /// - `DriverError::InvalidConfig`: 二进制表无效，或失败阈值顺序错误
    pub fn build(self) -> Result<Driver, DriverError> {
        if let Variant::Binary(table) = &self.variant {
            table.validate()?;
        }

        let config = self.pipeline_config.unwrap_or_default();
        if config.low_failure_threshold > config.high_failure_threshold {
            return Err(DriverError::InvalidConfig(format!(
                "low failure threshold {} above high threshold {}",
                config.low_failure_threshold, config.high_failure_threshold
            )));
        }

        let name = self.name.unwrap_or_else(|| self.endpoint.to_string());
        Ok(Driver::new(name, self.endpoint, self.variant, config))
    }
}
