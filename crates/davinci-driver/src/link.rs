//! 协议链路：传输与编解码的组合
//!
//! 生命周期、锁与 IO 循环对两种变体是共用的，只有入站/出站步骤不同：
//!
//! | 变体 | 传输 | 入站 | 出站 |
//! |---|---|---|---|
//! | [`TextLink`] | 字节流 | 非阻塞读取全部可用字节，流式解码 | 只发送有新内容的部分；写了一半的命令先续写完 |
//! | [`BinaryLink`] | 数据报 | 一次有截止时间的接收，定长帧解码 | 任一部分有新内容时发送完整帧 |

use crate::builder::BinaryTable;
use crate::context::DriverContext;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use crate::state::OutboundMode;
use crate::supervisor::DeadlineSupervisor;
use davinci_protocol::{
    Command, CommandFrame, DecodeHandler, FeedbackFrame, FrameLayout, Message, ProtocolError,
    StreamDecoder, encode_command,
};
use bytes::{Buf, Bytes};
use davinci_transport::{Interrupter, Transport, TransportError};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 文本变体每次读取的缓冲区大小
pub const READ_BUFFER_SIZE: usize = 4096;

/// 每次迭代最多读取的次数（避免持续数据流饿死出站步骤）
const MAX_READS_PER_TICK: usize = 64;

/// IO 循环使用的链路
///
/// `inbound`/`outbound` 自行处理可恢复的错误；返回的错误由 IO 循环判定：
/// `Cancelled` 在停止信号已发出时结束循环，其余错误都结束循环。
pub trait Link: Send + 'static {
    /// 变体名称（日志用）
    fn variant(&self) -> &'static str;

    /// 用于唤醒阻塞中接收的取消句柄
    fn interrupter(&self) -> Interrupter;

    /// IO 线程启动前调用一次
    fn on_connect(&mut self, _ctx: &DriverContext) {}

    fn inbound(&mut self, ctx: &DriverContext) -> Result<(), TransportError>;

    fn outbound(&mut self, ctx: &DriverContext) -> Result<(), TransportError>;

    /// 释放传输资源（IO 循环退出时调用）
    fn shutdown(&mut self);
}

/// 解码器处理器：先收集，feed 返回后再在锁内逐条应用
#[derive(Debug, Default)]
struct Inbox {
    messages: Vec<Message>,
    bad: Vec<ProtocolError>,
}

impl DecodeHandler for Inbox {
    fn on_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn on_bad_message(&mut self, error: &ProtocolError) {
        self.bad.push(error.clone());
    }
}

/// 文本变体链路（流式 JSON over TCP）
pub struct TextLink<T> {
    transport: T,
    decoder: StreamDecoder<Inbox>,
    buf: Vec<u8>,
    /// 已部分写出的命令的剩余字节
    unsent: Bytes,
}

impl<T: Transport> TextLink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            decoder: StreamDecoder::new(Inbox::default()),
            buf: vec![0; READ_BUFFER_SIZE],
            unsent: Bytes::new(),
        }
    }

    /// 是否有写了一半的命令
    pub fn has_unsent(&self) -> bool {
        !self.unsent.is_empty()
    }

    /// 续写上一条命令的剩余字节，全部写完返回 `true`
    fn flush_unsent(&mut self, ctx: &DriverContext) -> Result<bool, TransportError> {
        if self.unsent.is_empty() {
            return Ok(true);
        }

        match self.transport.send(&self.unsent) {
            Ok(()) => {
                trace!("Flushed {} unsent command bytes", self.unsent.len());
                self.unsent.clear();
                ctx.metrics.tx_messages.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            },
            Err(TransportError::Partial { written }) => {
                self.unsent.advance(written);
                Ok(false)
            },
            Err(TransportError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn apply_inbox(&mut self, ctx: &DriverContext) {
        let inbox = self.decoder.handler_mut();
        for error in inbox.bad.drain(..) {
            ctx.metrics.rx_bad_messages.fetch_add(1, Ordering::Relaxed);
            warn!("Bad message from controller: {}", error);
        }
        for message in inbox.messages.drain(..) {
            // 每条消息单独加锁
            if ctx.state.apply_message(&message) {
                ctx.metrics.rx_messages.fetch_add(1, Ordering::Relaxed);
                ctx.feedback.register_feedback();
            }
        }
    }
}

impl<T: Transport + 'static> Link for TextLink<T> {
    fn variant(&self) -> &'static str {
        "text"
    }

    fn interrupter(&self) -> Interrupter {
        self.transport.interrupter()
    }

    fn inbound(&mut self, ctx: &DriverContext) -> Result<(), TransportError> {
        for _ in 0..MAX_READS_PER_TICK {
            let Some(n) = self.transport.try_receive(&mut self.buf)? else {
                break;
            };
            ctx.metrics.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);

            if let Err(e) = self.decoder.feed(&self.buf[..n]) {
                debug!("Resetting stream decoder after: {}", e);
                self.decoder.reset();
            }
            self.apply_inbox(ctx);
        }
        Ok(())
    }

    fn outbound(&mut self, ctx: &DriverContext) -> Result<(), TransportError> {
        // 流上不能插入新命令，直到上一条写完；期间的修改保留在脏标志中
        if !self.flush_unsent(ctx)? {
            return Ok(());
        }

        let Some(outbound) = ctx.state.drain_outbound(OutboundMode::Partial) else {
            return Ok(());
        };

        let command = Command {
            header: outbound.header.clone(),
            setpoints: outbound.setpoints.clone(),
            enable_motor: outbound.enables.clone(),
        };
        let bytes = match encode_command(&command) {
            Ok(bytes) => bytes,
            Err(e) => {
                ctx.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to encode command: {}", e);
                return Ok(());
            },
        };

        match self.transport.send(&bytes) {
            Ok(()) => {
                ctx.metrics.tx_messages.fetch_add(1, Ordering::Relaxed);
                trace!("Sent {} byte command", bytes.len());
                Ok(())
            },
            Err(TransportError::Partial { written }) => {
                debug!("Command stalled after {} of {} bytes", written, bytes.len());
                self.unsent = bytes.slice(written..);
                Ok(())
            },
            Err(TransportError::Timeout) => {
                ctx.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Command send timed out");
                ctx.state.requeue_outbound(&outbound);
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.transport.shutdown() {
            debug!("Transport shutdown: {}", e);
        }
    }
}

/// 二进制变体链路（定长帧 over UDP）
pub struct BinaryLink<T> {
    transport: T,
    table: BinaryTable,
    layout: FrameLayout,
    supervisor: DeadlineSupervisor,
    receive_timeout: Duration,
    buf: Vec<u8>,
}

impl<T: Transport> BinaryLink<T> {
    /// # 错误
    /// - `DriverError::InvalidConfig`: 电机数超过 8
    pub fn new(transport: T, table: BinaryTable, config: &PipelineConfig) -> Result<Self, DriverError> {
        let layout = FrameLayout::new(table.joint_names.len(), table.motors().len())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            transport,
            table,
            layout,
            supervisor: DeadlineSupervisor::new(
                config.low_failure_threshold,
                config.high_failure_threshold,
            ),
            receive_timeout: config.receive_timeout(),
            // 多一个字节，用于识别超长的数据报
            buf: vec![0; layout.feedback_len() + 1],
        })
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }
}

impl<T: Transport + 'static> Link for BinaryLink<T> {
    fn variant(&self) -> &'static str {
        "binary"
    }

    fn interrupter(&self) -> Interrupter {
        self.transport.interrupter()
    }

    fn on_connect(&mut self, ctx: &DriverContext) {
        if ctx.state.populate_static(&self.table) {
            debug!(
                "Static joint table: {} joints, {} motors",
                self.layout.joints, self.layout.motors
            );
        }
    }

    fn inbound(&mut self, ctx: &DriverContext) -> Result<(), TransportError> {
        let layout = self.layout;
        let frame = self.supervisor.receive(
            &mut self.transport,
            &mut self.buf,
            self.receive_timeout,
            &ctx.metrics,
            |bytes| FeedbackFrame::decode(&layout, bytes),
        )?;

        if let Some(frame) = frame
            && ctx.state.apply_feedback(&frame)
        {
            ctx.metrics.rx_messages.fetch_add(1, Ordering::Relaxed);
            ctx.feedback.register_feedback();
        }
        Ok(())
    }

    fn outbound(&mut self, ctx: &DriverContext) -> Result<(), TransportError> {
        let Some(outbound) = ctx.state.drain_outbound(OutboundMode::Full) else {
            return Ok(());
        };

        // 设备原生精度为 f32
        let frame = CommandFrame {
            setpoints: outbound
                .setpoints
                .iter()
                .flatten()
                .map(|&value| value as f32)
                .collect(),
            enables: outbound.enables.clone().unwrap_or_default(),
        };
        let bytes = match frame.encode(&self.layout) {
            Ok(bytes) => bytes,
            Err(e) => {
                ctx.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to encode command frame: {}", e);
                return Ok(());
            },
        };

        match self.transport.send(&bytes) {
            Ok(()) => {
                ctx.metrics.tx_messages.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) if e.is_fatal() || matches!(e, TransportError::Cancelled) => Err(e),
            Err(e) => {
                ctx.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Command frame not sent: {}", e);
                ctx.state.requeue_outbound(&outbound);
                Ok(())
            },
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.transport.shutdown() {
            debug!("Transport shutdown: {}", e);
        }
    }
}
