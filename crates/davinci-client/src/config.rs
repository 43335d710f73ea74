//! 整机配置（TOML）
//!
//! ```toml
//! [[controllers]]
//! name = "psm1"
//! address = "192.168.0.10"
//! port = 8080
//!
//! [[controllers]]
//! name = "p4"
//! address = "192.168.0.11"
//! port = 9000
//! variant = "binary"
//!
//! [controllers.binary]
//! joint_names = ["p4_hand_roll", "p4_hand_pitch", "p4_instrument_slide", "p4_instrument_roll"]
//!
//! [pipeline]
//! receive_timeout_ms = 5
//! ```

use crate::error::ConfigError;
use davinci_driver::{BinaryTable, PipelineConfig, Variant};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// 控制器使用的协议变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    #[default]
    Text,
    Binary,
}

/// 单个嵌入式控制器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// 名称（默认 `controller{i}`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// IPv4/IPv6 地址
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub variant: VariantKind,
    /// 二进制变体的关节表（缺省时使用默认表）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BinaryTable>,
}

impl ControllerConfig {
    pub fn endpoint(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.address.parse().map_err(|_| {
            ConfigError::Invalid(format!("invalid controller address '{}'", self.address))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn variant(&self) -> Variant {
        match self.variant {
            VariantKind::Text => Variant::Text,
            VariantKind::Binary => Variant::Binary(self.binary.clone().unwrap_or_default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        match (self.variant, &self.binary) {
            (VariantKind::Text, Some(_)) => Err(ConfigError::Invalid(format!(
                "controller {}: binary table given for a text controller",
                self.address
            ))),
            (VariantKind::Binary, Some(table)) => table
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("controller {}: {}", self.address, e))),
            _ => Ok(()),
        }
    }
}

/// 整机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl RobotConfig {
    /// 从 TOML 字符串解析并校验
    ///
    /// # 错误
    /// - `ConfigError::Parse`: TOML 语法或结构错误
    /// - `ConfigError::Invalid`: 没有控制器、地址无效或二进制表无效
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RobotConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载
    ///
    /// ```no_run
    /// use davinci_client::RobotConfig;
    ///
    /// let config = RobotConfig::load("davinci.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controllers.is_empty() {
            return Err(ConfigError::Invalid("no controllers configured".to_string()));
        }
        for controller in &self.controllers {
            controller.validate()?;
        }
        if self.pipeline.low_failure_threshold > self.pipeline.high_failure_threshold {
            return Err(ConfigError::Invalid(
                "low_failure_threshold above high_failure_threshold".to_string(),
            ));
        }
        Ok(())
    }
}
