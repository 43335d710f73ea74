//! 流式 JSON 解码器
//!
//! 文本变体通过面向连接的字节流传输自描述的 JSON 文档。解码器增量地接收
//! 字节，按 JSON 语法（而不是按行）切分出完整的根对象并交给处理器。
//!
//! # BadMessage 处理
//!
//! 遇到语法错误时解码器会通知处理器并进入“需要 reset”状态，之后的 `feed`
//! 都会返回 [`ProtocolError::NeedsReset`]，直到调用者显式调用 [`StreamDecoder::reset`]
//! 丢弃全部缓冲数据。解码器不会自行重新同步，避免把被截断的消息误解为另一条消息。

use crate::message::{Command, Message};
use crate::{LINE_TERMINATOR, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tracing::trace;

/// 单条未完成消息允许缓冲的最大字节数
pub const MAX_PENDING_BYTES: usize = 1 << 20;

/// 不超过此大小的未完成输入每次 feed 都会尝试解析（尽早发现语法错误）
const EAGER_PARSE_BYTES: usize = 64 * 1024;

/// 增量括号扫描：判断缓冲区中是否可能已有完整的根值
///
/// 只跟踪嵌套深度与字符串状态，不做语法校验。每个字节只扫描一次。
#[derive(Debug, Default)]
struct Scanner {
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    complete: bool,
}

impl Scanner {
    fn scan(&mut self, buffer: &[u8]) {
        for &byte in &buffer[self.offset..] {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        self.complete = true;
                    }
                },
                b' ' | b'\t' | b'\r' | b'\n' => {},
                b'"' => {
                    self.in_string = true;
                    if self.depth == 0 {
                        self.complete = true;
                    }
                },
                // 根层级的标量或垃圾，交给解析器判断
                _ if self.depth == 0 => self.complete = true,
                _ => {},
            }
        }
        self.offset = buffer.len();
    }
}

/// 解码结果处理器
///
/// 在解码器构造时注入，解码器本身不关心调用者身份。
pub trait DecodeHandler {
    /// 收到一条完整且结构合法的消息
    fn on_message(&mut self, message: Message);

    /// 收到无法使用的输入（语法错误或结构错误）
    fn on_bad_message(&mut self, error: &ProtocolError);
}

/// 闭包对 `(on_message, on_bad_message)` 也可以直接作为处理器
impl<M, B> DecodeHandler for (M, B)
where
    M: FnMut(Message),
    B: FnMut(&ProtocolError),
{
    fn on_message(&mut self, message: Message) {
        (self.0)(message)
    }

    fn on_bad_message(&mut self, error: &ProtocolError) {
        (self.1)(error)
    }
}

/// 增量流式解码器
///
/// # Example
///
/// ```
/// use davinci_protocol::{Message, StreamDecoder};
///
/// let mut messages = Vec::new();
/// let mut decoder = StreamDecoder::new((
///     |msg: Message| messages.push(msg),
///     |_err: &davinci_protocol::ProtocolError| {},
/// ));
///
/// // 消息可以被任意切分
/// decoder.feed(b"{\"robot\": {\"posi").unwrap();
/// decoder.feed(b"tion\": [1.0]}}\r\n").unwrap();
/// drop(decoder);
/// assert_eq!(messages.len(), 1);
/// ```
pub struct StreamDecoder<H> {
    buffer: BytesMut,
    handler: H,
    needs_reset: bool,
    scanner: Scanner,
    /// 上一次解析后剩余的未完成字节数
    parsed_len: usize,
}

impl<H: DecodeHandler> StreamDecoder<H> {
    /// 创建解码器，`handler` 接收所有解码结果
    pub fn new(handler: H) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            handler,
            needs_reset: false,
            scanner: Scanner::default(),
            parsed_len: 0,
        }
    }

    /// 输入新到达的字节，返回本次解码出的消息数量
    ///
    /// # 错误
    /// - `ProtocolError::BadMessage`: 出现语法错误（处理器已被通知），必须 `reset`
    /// - `ProtocolError::NeedsReset`: 上一次的 BadMessage 尚未 `reset`
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if self.needs_reset {
            return Err(ProtocolError::NeedsReset);
        }

        self.buffer.extend_from_slice(bytes);
        self.scanner.scan(&self.buffer);

        // 大的未完成消息只在可能完整或长度翻倍时重新解析
        let len = self.buffer.len();
        if !self.scanner.complete && len > EAGER_PARSE_BYTES && len < 2 * self.parsed_len {
            return self.check_pending_limit().map(|()| 0);
        }

        let mut values = Vec::new();
        let mut consumed = 0;
        let mut syntax_error = None;
        {
            let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(value)) => {
                        consumed = stream.byte_offset();
                        values.push(value);
                    },
                    // 消息尚未完整，保留剩余字节等待下一次 feed
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        syntax_error = Some(e.to_string());
                        break;
                    },
                    None => break,
                }
            }
        }
        let _ = self.buffer.split_to(consumed);
        self.scanner = Scanner::default();
        self.scanner.scan(&self.buffer);
        self.parsed_len = self.buffer.len();

        let decoded = values.len();
        for value in values {
            match Message::from_value(value) {
                Ok(message) => self.handler.on_message(message),
                Err(e) => self.handler.on_bad_message(&e),
            }
        }

        if let Some(message) = syntax_error {
            return Err(self.poison(message));
        }
        self.check_pending_limit()?;

        trace!(
            "decoded {} messages, {} bytes pending",
            decoded,
            self.buffer.len()
        );
        Ok(decoded)
    }

    fn check_pending_limit(&mut self) -> Result<(), ProtocolError> {
        if self.buffer.len() > MAX_PENDING_BYTES {
            let message = format!(
                "{} bytes buffered without a complete message",
                self.buffer.len()
            );
            return Err(self.poison(message));
        }
        Ok(())
    }

    fn poison(&mut self, message: String) -> ProtocolError {
        let error = ProtocolError::BadMessage(message);
        self.needs_reset = true;
        self.handler.on_bad_message(&error);
        error
    }

    /// 丢弃所有缓冲的部分输入，恢复可用状态
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.needs_reset = false;
        self.scanner = Scanner::default();
        self.parsed_len = 0;
    }

    /// 是否处于 BadMessage 之后等待 reset 的状态
    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    /// 当前缓冲的未完成字节数
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

/// 将命令编码为以 CRLF 结尾的 JSON 文档
///
/// # 错误
/// - `ProtocolError::Encode`: 根消息头为空或序列化失败
pub fn encode_command(command: &Command) -> Result<Bytes, ProtocolError> {
    if command.header.is_empty() {
        return Err(ProtocolError::Encode("missing root header".to_string()));
    }

    let body = serde_json::to_value(command).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let mut root = serde_json::Map::new();
    root.insert(command.header.clone(), body);

    let mut writer = BytesMut::with_capacity(256).writer();
    serde_json::to_writer(&mut writer, &Value::Object(root))
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let mut out = writer.into_inner();
    out.put_slice(LINE_TERMINATOR);
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Telemetry;

    /// 收集所有解码结果的测试处理器
    #[derive(Default)]
    struct Collector {
        messages: Vec<Message>,
        bad: Vec<ProtocolError>,
    }

    impl DecodeHandler for Collector {
        fn on_message(&mut self, message: Message) {
            self.messages.push(message);
        }

        fn on_bad_message(&mut self, error: &ProtocolError) {
            self.bad.push(error.clone());
        }
    }

    const TELEMETRY: &[u8] = b"{\"robot\":{\"position\":[1.0,2.0]}}\r\n";

    #[test]
    fn test_single_message() {
        let mut decoder = StreamDecoder::new(Collector::default());
        assert_eq!(decoder.feed(TELEMETRY).unwrap(), 1);
        assert_eq!(decoder.handler().messages.len(), 1);
        assert_eq!(decoder.pending_bytes(), 2); // 尾随的 CRLF
    }

    #[test]
    fn test_message_split_across_feeds() {
        let mut decoder = StreamDecoder::new(Collector::default());
        let (head, tail) = TELEMETRY.split_at(10);
        assert_eq!(decoder.feed(head).unwrap(), 0);
        assert_eq!(decoder.feed(tail).unwrap(), 1);

        let Message::Telemetry(Telemetry { position, .. }) = &decoder.handler().messages[0] else {
            panic!("Expected telemetry");
        };
        assert_eq!(position.as_deref(), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn test_large_message_in_small_chunks() {
        let positions = vec![0.25; 50_000];
        let message = serde_json::json!({"robot": {"position": positions}});
        let bytes = format!("{}\r\n", message).into_bytes();
        assert!(bytes.len() > EAGER_PARSE_BYTES);

        let mut decoder = StreamDecoder::new(Collector::default());
        let mut decoded = 0;
        for chunk in bytes.chunks(512) {
            decoded += decoder.feed(chunk).unwrap();
        }
        assert_eq!(decoded, 1);

        let Message::Telemetry(Telemetry { position, .. }) = &decoder.handler().messages[0] else {
            panic!("Expected telemetry");
        };
        assert_eq!(position.as_ref().map(Vec::len), Some(50_000));
    }

    #[test]
    fn test_scanner_ignores_brackets_in_strings() {
        let mut scanner = Scanner::default();
        let mut buffer = br#"{"a":"}]\"#.to_vec();
        scanner.scan(&buffer);
        assert!(!scanner.complete);

        buffer.extend_from_slice(br#""{"}"#);
        scanner.scan(&buffer);
        assert!(scanner.complete);
        assert_eq!(scanner.depth, 0);
        assert!(serde_json::from_slice::<Value>(&buffer).is_ok());
    }

    #[test]
    fn test_several_messages_in_one_chunk() {
        let mut decoder = StreamDecoder::new(Collector::default());
        let mut chunk = TELEMETRY.to_vec();
        chunk.extend_from_slice(b"{}\r\n");
        chunk.extend_from_slice(TELEMETRY);
        assert_eq!(decoder.feed(&chunk).unwrap(), 3);
        assert_eq!(
            decoder.handler().messages.iter().filter(|m| **m == Message::Empty).count(),
            1
        );
    }

    #[test]
    fn test_bad_message_requires_reset() {
        let mut decoder = StreamDecoder::new(Collector::default());
        assert!(matches!(
            decoder.feed(b"{bad"),
            Err(ProtocolError::BadMessage(_))
        ));
        assert!(decoder.needs_reset());
        assert_eq!(decoder.handler().bad.len(), 1);

        // 未 reset 前拒绝继续解码
        assert_eq!(decoder.feed(TELEMETRY), Err(ProtocolError::NeedsReset));

        decoder.reset();
        assert_eq!(decoder.feed(TELEMETRY).unwrap(), 1);
    }

    #[test]
    fn test_recovery_matches_clean_stream() {
        let mut dirty = StreamDecoder::new(Collector::default());
        let _ = dirty.feed(b"{bad");
        dirty.reset();
        dirty.feed(TELEMETRY).unwrap();

        let mut clean = StreamDecoder::new(Collector::default());
        clean.feed(TELEMETRY).unwrap();

        assert_eq!(dirty.handler().messages, clean.handler().messages);
    }

    #[test]
    fn test_shape_error_does_not_poison() {
        let mut decoder = StreamDecoder::new(Collector::default());
        decoder.feed(b"{\"robot\":{\"position\":[\"x\"]}}").unwrap();
        assert_eq!(decoder.handler().bad.len(), 1);
        assert!(!decoder.needs_reset());
        decoder.feed(TELEMETRY).unwrap();
        assert_eq!(decoder.handler().messages.len(), 1);
    }

    #[test]
    fn test_closure_handler() {
        let mut count = 0;
        let mut bad = 0;
        {
            let mut decoder = StreamDecoder::new((
                |_m: Message| count += 1,
                |_e: &ProtocolError| bad += 1,
            ));
            decoder.feed(TELEMETRY).unwrap();
            let _ = decoder.feed(b"]");
        }
        assert_eq!(count, 1);
        assert_eq!(bad, 1);
    }

    #[test]
    fn test_encode_command() {
        let command = Command {
            header: "robot".to_string(),
            setpoints: Some(vec![0.5, 1.0]),
            enable_motor: Some(vec![true]),
        };
        let bytes = encode_command(&command).unwrap();
        assert!(bytes.ends_with(b"\r\n"));

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["robot"]["setpoints"], serde_json::json!([0.5, 1.0]));
        assert_eq!(value["robot"]["enablemotor"], serde_json::json!([true]));
    }

    #[test]
    fn test_encode_command_omits_clean_members() {
        let command = Command {
            header: "robot".to_string(),
            setpoints: None,
            enable_motor: Some(vec![false, true]),
        };
        let bytes = encode_command(&command).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["robot"].get("setpoints").is_none());
    }

    #[test]
    fn test_encode_command_requires_header() {
        assert!(matches!(
            encode_command(&Command::default()),
            Err(ProtocolError::Encode(_))
        ));
    }
}
