//! 定长二进制帧
//!
//! 帧没有头部也没有分隔符，长度完全由关节数 `J` 决定：
//!
//! ```text
//! 驱动 → 设备: [setpoint; J] (f32 BE)                                   | enable 位图 (1 byte)
//! 设备 → 驱动: [position; J] [velocity; J] [effort; J] (f32 BE)          | active 位图 (1 byte)
//! ```

use crate::{
    FLOAT_LENGTH, MAX_PACKED_FLAGS, ProtocolError, decode_f32_be, encode_f32_be, pack_bits,
    unpack_bits,
};

/// 帧布局（关节数与电机数在配置时确定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub joints: usize,
    pub motors: usize,
}

impl FrameLayout {
    /// 创建布局
    ///
    /// # 错误
    /// - `ProtocolError::TooManyFlags`: 电机数超过一个位图字节的容量
    pub fn new(joints: usize, motors: usize) -> Result<Self, ProtocolError> {
        if motors > MAX_PACKED_FLAGS {
            return Err(ProtocolError::TooManyFlags { count: motors });
        }
        Ok(Self { joints, motors })
    }

    /// 命令帧长度：`4*J + 1`
    pub const fn command_len(&self) -> usize {
        self.joints * FLOAT_LENGTH + 1
    }

    /// 反馈帧长度：`12*J + 1`
    pub const fn feedback_len(&self) -> usize {
        3 * self.joints * FLOAT_LENGTH + 1
    }

    fn check_len(expected: usize, actual: usize) -> Result<(), ProtocolError> {
        if expected != actual {
            return Err(ProtocolError::InvalidLength { expected, actual });
        }
        Ok(())
    }

    fn check_field(field: &'static str, expected: usize, actual: usize) -> Result<(), ProtocolError> {
        if expected != actual {
            return Err(ProtocolError::FieldLength {
                field,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// 命令帧（驱动 → 设备）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandFrame {
    pub setpoints: Vec<f32>,
    pub enables: Vec<bool>,
}

impl CommandFrame {
    /// 编码为线上字节
    ///
    /// # 错误
    /// - `ProtocolError::FieldLength`: 设定值或使能标志数量与布局不符
    pub fn encode(&self, layout: &FrameLayout) -> Result<Vec<u8>, ProtocolError> {
        FrameLayout::check_field("setpoints", layout.joints, self.setpoints.len())?;
        FrameLayout::check_field("enablemotor", layout.motors, self.enables.len())?;

        let mut out = Vec::with_capacity(layout.command_len());
        for &value in &self.setpoints {
            out.extend_from_slice(&encode_f32_be(value));
        }
        out.push(pack_bits(&self.enables)?);
        Ok(out)
    }

    /// 从线上字节解码（设备侧/测试使用）
    pub fn decode(layout: &FrameLayout, bytes: &[u8]) -> Result<Self, ProtocolError> {
        FrameLayout::check_len(layout.command_len(), bytes.len())?;

        let (floats, flags) = bytes.split_at(layout.joints * FLOAT_LENGTH);
        Ok(Self {
            setpoints: read_block(floats),
            enables: unpack_bits(flags[0], layout.motors)?,
        })
    }
}

/// 反馈帧（设备 → 驱动）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedbackFrame {
    pub positions: Vec<f32>,
    pub velocities: Vec<f32>,
    pub efforts: Vec<f32>,
    pub active: Vec<bool>,
}

impl FeedbackFrame {
    /// 从线上字节解码
    ///
    /// 长度必须精确等于 `12*J + 1`，截断或多余的字节都视为错误。
    ///
    /// # 错误
    /// - `ProtocolError::InvalidLength`: 帧长度不符
    pub fn decode(layout: &FrameLayout, bytes: &[u8]) -> Result<Self, ProtocolError> {
        FrameLayout::check_len(layout.feedback_len(), bytes.len())?;

        let block = layout.joints * FLOAT_LENGTH;
        let (positions, rest) = bytes.split_at(block);
        let (velocities, rest) = rest.split_at(block);
        let (efforts, flags) = rest.split_at(block);

        Ok(Self {
            positions: read_block(positions),
            velocities: read_block(velocities),
            efforts: read_block(efforts),
            active: unpack_bits(flags[0], layout.motors)?,
        })
    }

    /// 编码为线上字节（模拟设备/测试使用）
    pub fn encode(&self, layout: &FrameLayout) -> Result<Vec<u8>, ProtocolError> {
        FrameLayout::check_field("position", layout.joints, self.positions.len())?;
        FrameLayout::check_field("velocity", layout.joints, self.velocities.len())?;
        FrameLayout::check_field("effort", layout.joints, self.efforts.len())?;
        FrameLayout::check_field("motoractive", layout.motors, self.active.len())?;

        let mut out = Vec::with_capacity(layout.feedback_len());
        for block in [&self.positions, &self.velocities, &self.efforts] {
            for &value in block {
                out.extend_from_slice(&encode_f32_be(value));
            }
        }
        out.push(pack_bits(&self.active)?);
        Ok(out)
    }
}

fn read_block(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(FLOAT_LENGTH)
        .map(|chunk| decode_f32_be([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
