//! 文本协议消息模型
//!
//! 每条消息是一个只含单个根成员的 JSON 对象，根成员名决定消息类型：
//!
//! ```text
//! {"<header>_names": {"position": [..], "setpoints": [..], "motoractive": [..]}}   握手（设备 → 驱动）
//! {"<header>":       {"position": [..], "velocity": [..], "effort": [..], "motoractive": [..]}}   遥测（设备 → 驱动）
//! {"<header>":       {"setpoints": [..], "enablemotor": [..]}}   命令（驱动 → 设备）
//! ```

use crate::{HANDSHAKE_SUFFIX, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 握手消息
///
/// 建立关节/电机的名称与顺序，并捕获会话的根消息头。
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Handshake {
    /// 根消息头（根成员名去掉 `_names` 后缀）
    #[serde(skip)]
    pub header: String,
    /// 关节名（决定关节数量与顺序）
    #[serde(default)]
    pub position: Vec<String>,
    /// 接受设定值的关节名（必须出现在 `position` 中）
    #[serde(default)]
    pub setpoints: Vec<String>,
    /// 电机名（决定电机数量与顺序）
    #[serde(default, rename = "motoractive")]
    pub motor_active: Vec<String>,
}

/// 遥测消息
///
/// 所有子成员均可缺省；缺省的子成员不修改对应状态。
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Telemetry {
    /// 根成员名（与会话的根消息头比较）
    #[serde(skip)]
    pub member: String,
    pub position: Option<Vec<f64>>,
    pub velocity: Option<Vec<f64>>,
    pub effort: Option<Vec<f64>>,
    #[serde(rename = "motoractive")]
    pub motor_active: Option<Vec<bool>>,
}

/// 命令消息（驱动 → 设备）
///
/// 只包含有新内容的子成员。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Command {
    #[serde(skip)]
    pub header: String,
    /// 接受设定值的关节的设定值（按关节顺序）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoints: Option<Vec<f64>>,
    /// 所有电机的使能标志（按电机顺序）
    #[serde(default, rename = "enablemotor", skip_serializing_if = "Option::is_none")]
    pub enable_motor: Option<Vec<bool>>,
}

impl Command {
    /// 是否没有任何需要发送的内容
    pub fn is_empty(&self) -> bool {
        self.setpoints.is_none() && self.enable_motor.is_none()
    }

    /// 从已解析的 JSON 值还原命令（设备侧/测试使用）
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let (header, body) = single_member(value)?
            .ok_or_else(|| ProtocolError::InvalidMessage("empty command".to_string()))?;
        let mut command: Command = serde_json::from_value(body)
            .map_err(|e| ProtocolError::InvalidMessage(format!("{}: {}", header, e)))?;
        command.header = header;
        Ok(command)
    }
}

/// 解码后的入站消息
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Handshake(Handshake),
    Telemetry(Telemetry),
    /// 根对象没有任何成员（静默忽略）
    Empty,
}

impl Message {
    /// 按根成员名对消息分类并解析消息体
    ///
    /// # 错误
    /// - `ProtocolError::InvalidMessage`: 根不是对象、根成员多于一个，或消息体结构不符
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Some((name, body)) = single_member(value)? else {
            return Ok(Message::Empty);
        };

        match name.strip_suffix(HANDSHAKE_SUFFIX) {
            Some(header) if !header.is_empty() => {
                let mut handshake: Handshake = serde_json::from_value(body)
                    .map_err(|e| ProtocolError::InvalidMessage(format!("{}: {}", name, e)))?;
                handshake.header = header.to_string();
                Ok(Message::Handshake(handshake))
            },
            _ => {
                let mut telemetry: Telemetry = serde_json::from_value(body)
                    .map_err(|e| ProtocolError::InvalidMessage(format!("{}: {}", name, e)))?;
                telemetry.member = name;
                Ok(Message::Telemetry(telemetry))
            },
        }
    }
}

/// 取出根对象唯一的成员
fn single_member(value: Value) -> Result<Option<(String, Value)>, ProtocolError> {
    let Value::Object(root) = value else {
        return Err(ProtocolError::InvalidMessage(
            "root is not an object".to_string(),
        ));
    };

    if root.len() > 1 {
        return Err(ProtocolError::InvalidMessage(format!(
            "expected one root member, got {}",
            root.len()
        )));
    }

    Ok(root.into_iter().next())
}
