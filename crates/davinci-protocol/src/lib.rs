//! # Davinci Protocol
//!
//! Davinci 机器人嵌入式控制器（sbRIO）的线协议定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量定义
//! - `message`: 文本协议的消息模型（握手 / 遥测 / 命令）
//! - `stream`: 流式 JSON 解码器与命令编码
//! - `frame`: 定长二进制帧编解码
//!
//! ## 字节序
//!
//! 二进制协议使用大端字节序（网络字节序）传输 32 位浮点数，
//! 布尔标志按位打包到单个字节中（bit 0 为最低位）。
//! 本模块提供了字节序转换和位打包工具函数。

pub mod constants;
pub mod frame;
pub mod message;
pub mod stream;

// 重新导出常用类型
pub use constants::*;
pub use frame::{CommandFrame, FeedbackFrame, FrameLayout};
pub use message::{Command, Handshake, Message, Telemetry};
pub use stream::{DecodeHandler, StreamDecoder, encode_command};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Too many flags to pack into one byte: {count} (max 8)")]
    TooManyFlags { count: usize },

    #[error("Field {field} has {actual} entries, expected {expected}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// 字节流中出现语法错误（BadMessage）
    #[error("Bad message: {0}")]
    BadMessage(String),

    /// 语法正确但结构不符合协议
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// 解码器在 BadMessage 之后尚未被 reset
    #[error("Stream decoder must be reset after a bad message")]
    NeedsReset,

    #[error("Encode error: {0}")]
    Encode(String),
}

/// 大端字节序转 f32
///
/// 线上格式与主机字节序无关，始终显式按大端解释。
pub fn decode_f32_be(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_be_bytes(bytes))
}

/// f32 转大端字节序
pub fn encode_f32_be(value: f32) -> [u8; 4] {
    value.to_bits().to_be_bytes()
}

/// 将最多 8 个布尔标志打包为一个字节
///
/// 标志 `i` 占据 bit `i`（bit 0 为最低位），超出标志数量的位为 0。
///
/// # 错误
/// - `ProtocolError::TooManyFlags`: 标志数量超过 8
///
/// # Example
///
/// ```
/// use davinci_protocol::pack_bits;
///
/// assert_eq!(pack_bits(&[true, false, true]).unwrap(), 0b0000_0101);
/// assert!(pack_bits(&[false; 9]).is_err());
/// ```
pub fn pack_bits(flags: &[bool]) -> Result<u8, ProtocolError> {
    if flags.len() > MAX_PACKED_FLAGS {
        return Err(ProtocolError::TooManyFlags { count: flags.len() });
    }

    Ok(flags
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &flag)| acc | ((flag as u8) << i)))
}

/// 从一个字节中解包 `count` 个布尔标志
///
/// 逐次右移并取模 2，恰好是 [`pack_bits`] 的逆运算。
///
/// # 错误
/// - `ProtocolError::TooManyFlags`: `count` 超过 8
pub fn unpack_bits(byte: u8, count: usize) -> Result<Vec<bool>, ProtocolError> {
    if count > MAX_PACKED_FLAGS {
        return Err(ProtocolError::TooManyFlags { count });
    }

    let mut remaining = byte;
    let mut flags = Vec::with_capacity(count);
    for _ in 0..count {
        flags.push(remaining % 2 == 1);
        remaining >>= 1;
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_f32_be() {
        // 1.0f32 = 0x3F800000
        assert_eq!(encode_f32_be(1.0), [0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(encode_f32_be(-2.5), [0xC0, 0x20, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_f32_be() {
        assert_eq!(decode_f32_be([0x3F, 0x80, 0x00, 0x00]), 1.0);
        assert_eq!(decode_f32_be([0x00, 0x00, 0x00, 0x00]), 0.0);
    }

    #[test]
    fn test_pack_bits_lsb_first() {
        assert_eq!(pack_bits(&[]).unwrap(), 0);
        assert_eq!(pack_bits(&[true]).unwrap(), 0b0000_0001);
        assert_eq!(pack_bits(&[false, true]).unwrap(), 0b0000_0010);
        assert_eq!(pack_bits(&[true; 8]).unwrap(), 0xFF);
    }

    #[test]
    fn test_pack_bits_rejects_nine_flags() {
        assert_eq!(
            pack_bits(&[true; 9]),
            Err(ProtocolError::TooManyFlags { count: 9 })
        );
    }

    #[test]
    fn test_unpack_bits() {
        assert_eq!(
            unpack_bits(0b0000_0101, 4).unwrap(),
            vec![true, false, true, false]
        );
        // 超出 count 的高位被忽略
        assert_eq!(unpack_bits(0xFF, 2).unwrap(), vec![true, true]);
        assert!(unpack_bits(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_unpack_bits_rejects_large_count() {
        assert_eq!(
            unpack_bits(0, 9),
            Err(ProtocolError::TooManyFlags { count: 9 })
        );
    }

    proptest! {
        #[test]
        fn f32_be_roundtrip(bits in any::<u32>()) {
            let value = f32::from_bits(bits);
            let decoded = decode_f32_be(encode_f32_be(value));
            // NaN 不满足 ==，比较位模式
            prop_assert_eq!(decoded.to_bits(), value.to_bits());
        }

        #[test]
        fn finite_f32_roundtrip_is_exact(value in proptest::num::f32::NORMAL | proptest::num::f32::ZERO) {
            prop_assert_eq!(decode_f32_be(encode_f32_be(value)), value);
        }

        #[test]
        fn bits_roundtrip(flags in proptest::collection::vec(any::<bool>(), 0..=8)) {
            let byte = pack_bits(&flags).unwrap();
            prop_assert_eq!(unpack_bits(byte, flags.len()).unwrap(), flags);
        }
    }
}
