//! 截止时间监督器（二进制变体）
//!
//! 每次只有一个未完成的接收操作，且该操作最多阻塞 `timeout`。
//! 超时、可恢复的 IO 错误与长度错误的帧都计为一次失败；任何一次成功清零计数。
//! 连续失败达到低/高阈值时只做诊断输出，不触发任何恢复动作。

use crate::metrics::{LinkHealth, LinkMetrics};
use davinci_protocol::ProtocolError;
use davinci_transport::{Transport, TransportError};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 默认低阈值
pub const DEFAULT_LOW_THRESHOLD: u32 = 10;
/// 默认高阈值
pub const DEFAULT_HIGH_THRESHOLD: u32 = 20;

#[derive(Debug)]
pub struct DeadlineSupervisor {
    low: u32,
    high: u32,
    consecutive: u32,
}

impl DeadlineSupervisor {
    pub fn new(low: u32, high: u32) -> Self {
        Self {
            low,
            high,
            consecutive: 0,
        }
    }

    /// 在 `timeout` 内接收并解码一帧
    ///
    /// 返回 `Ok(None)` 表示一次已计数的可恢复失败。
    ///
    /// # 错误
    /// - `TransportError::Cancelled`: 接收被取消（关闭驱动）
    /// - 其他致命传输错误（见 [`TransportError::is_fatal`]）
    pub fn receive<T, F>(
        &mut self,
        transport: &mut T,
        buf: &mut [u8],
        timeout: Duration,
        metrics: &LinkMetrics,
        decode: impl FnOnce(&[u8]) -> Result<F, ProtocolError>,
    ) -> Result<Option<F>, TransportError>
    where
        T: Transport + ?Sized,
    {
        match transport.receive_timeout(buf, timeout) {
            Ok(n) => {
                metrics.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                match decode(&buf[..n]) {
                    Ok(frame) => {
                        self.record_success(metrics);
                        Ok(Some(frame))
                    },
                    Err(e) => {
                        metrics.rx_bad_messages.fetch_add(1, Ordering::Relaxed);
                        warn!("Discarding invalid frame: {}", e);
                        self.record_failure(metrics);
                        Ok(None)
                    },
                }
            },
            Err(TransportError::Timeout) => {
                metrics.rx_timeouts.fetch_add(1, Ordering::Relaxed);
                self.record_failure(metrics);
                Ok(None)
            },
            Err(e) if matches!(e, TransportError::Cancelled) || e.is_fatal() => Err(e),
            Err(e) => {
                metrics.rx_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Receive error: {}", e);
                self.record_failure(metrics);
                Ok(None)
            },
        }
    }

    /// 记录一次失败，返回当前健康度
    pub fn record_failure(&mut self, metrics: &LinkMetrics) -> LinkHealth {
        self.consecutive = self.consecutive.saturating_add(1);
        self.publish(metrics);

        if self.consecutive == self.low {
            warn!(
                "{} consecutive receive failures, link degraded",
                self.consecutive
            );
        } else if self.consecutive == self.high {
            error!(
                "{} consecutive receive failures, controller not responding",
                self.consecutive
            );
        }
        self.health()
    }

    pub fn record_success(&mut self, metrics: &LinkMetrics) {
        if self.consecutive >= self.low {
            info!(
                "Link recovered after {} consecutive failures",
                self.consecutive
            );
        }
        self.consecutive = 0;
        self.publish(metrics);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn health(&self) -> LinkHealth {
        LinkHealth::from_failures(u64::from(self.consecutive), self.low, self.high)
    }

    fn publish(&self, metrics: &LinkMetrics) {
        metrics
            .consecutive_failures
            .store(u64::from(self.consecutive), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davinci_transport::MockTransport;
    use std::time::Instant;

    fn supervisor() -> (DeadlineSupervisor, LinkMetrics) {
        (
            DeadlineSupervisor::new(DEFAULT_LOW_THRESHOLD, DEFAULT_HIGH_THRESHOLD),
            LinkMetrics::new(),
        )
    }

    fn exact(len: usize) -> impl FnOnce(&[u8]) -> Result<Vec<u8>, ProtocolError> {
        move |bytes| {
            if bytes.len() == len {
                Ok(bytes.to_vec())
            } else {
                Err(ProtocolError::InvalidLength {
                    expected: len,
                    actual: bytes.len(),
                })
            }
        }
    }

    #[test]
    fn test_silent_source_times_out_within_deadline() {
        let (mut supervisor, metrics) = supervisor();
        let (mut transport, _peer) = MockTransport::datagram();
        let mut buf = [0u8; 16];

        let timeout = Duration::from_millis(20);
        let start = Instant::now();
        let result = supervisor.receive(&mut transport, &mut buf, timeout, &metrics, exact(4));
        let elapsed = start.elapsed();

        assert!(matches!(result, Ok(None)));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(200), "took {:?}", elapsed);
        assert_eq!(metrics.snapshot().rx_timeouts, 1);
        assert_eq!(supervisor.consecutive_failures(), 1);
    }

    #[test]
    fn test_escalation_and_recovery() {
        let (mut supervisor, metrics) = supervisor();
        for _ in 0..9 {
            supervisor.record_failure(&metrics);
        }
        assert_eq!(supervisor.health(), LinkHealth::Nominal);
        assert_eq!(supervisor.record_failure(&metrics), LinkHealth::Degraded);
        for _ in 0..9 {
            supervisor.record_failure(&metrics);
        }
        assert_eq!(supervisor.record_failure(&metrics), LinkHealth::Lost);
        assert_eq!(metrics.snapshot().consecutive_failures, 20);

        supervisor.record_success(&metrics);
        assert_eq!(supervisor.health(), LinkHealth::Nominal);
        assert_eq!(metrics.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_invalid_frame_counts_as_failure() {
        let (mut supervisor, metrics) = supervisor();
        let (mut transport, peer) = MockTransport::datagram();
        let mut buf = [0u8; 16];

        peer.send(vec![0u8; 3]);
        let result =
            supervisor.receive(&mut transport, &mut buf, Duration::from_millis(50), &metrics, exact(4));
        assert!(matches!(result, Ok(None)));
        assert_eq!(metrics.snapshot().rx_bad_messages, 1);
        assert_eq!(supervisor.consecutive_failures(), 1);

        peer.send(vec![7u8; 4]);
        let result =
            supervisor.receive(&mut transport, &mut buf, Duration::from_millis(50), &metrics, exact(4));
        assert_eq!(result.unwrap(), Some(vec![7u8; 4]));
        assert_eq!(supervisor.consecutive_failures(), 0);
    }

    #[test]
    fn test_cancel_is_propagated() {
        let (mut supervisor, metrics) = supervisor();
        let (mut transport, _peer) = MockTransport::datagram();
        transport.interrupter().interrupt();

        let mut buf = [0u8; 16];
        let result = supervisor.receive(&mut transport, &mut buf, Duration::from_secs(5), &metrics, exact(4));
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert_eq!(supervisor.consecutive_failures(), 0);
    }

    #[test]
    fn test_closed_is_propagated() {
        let (mut supervisor, metrics) = supervisor();
        let (mut transport, peer) = MockTransport::datagram();
        drop(peer);

        let mut buf = [0u8; 16];
        let result = supervisor.receive(&mut transport, &mut buf, Duration::from_millis(10), &metrics, exact(4));
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
