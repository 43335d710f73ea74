//! 协议常量定义

/// 32 位浮点数在线上的字节数
pub const FLOAT_LENGTH: usize = 4;

/// 一个字节最多可打包的布尔标志数量
pub const MAX_PACKED_FLAGS: usize = 8;

/// 二进制变体的默认关节数（控制器固件编译期常量）
pub const DEFAULT_BINARY_JOINTS: usize = 4;

/// 文本协议的行终止符
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// 握手消息根成员名的后缀（`<header>_names`）
pub const HANDSHAKE_SUFFIX: &str = "_names";

/// 二进制变体默认的关节名表（器械臂 p4）
pub const DEFAULT_BINARY_JOINT_NAMES: [&str; DEFAULT_BINARY_JOINTS] = [
    "p4_hand_roll",
    "p4_hand_pitch",
    "p4_instrument_slide",
    "p4_instrument_roll",
];
