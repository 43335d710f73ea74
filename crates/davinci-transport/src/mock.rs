//! 内存 Mock 传输（测试用）
//!
//! [`MockTransport`] 交给驱动，[`MockPeer`] 留在测试中扮演设备。
//! 丢弃 `MockPeer` 等价于对端关闭连接。

use crate::{Interrupt, Interrupter, Transport, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, select, unbounded};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 不限制发送
const UNLIMITED: usize = usize::MAX;

impl Interrupt for Sender<()> {
    fn interrupt(&self) -> io::Result<()> {
        match self.try_send(()) {
            // 已有一个未消费的取消信号
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

/// 驱动侧的 Mock 传输
pub struct MockTransport {
    inbound: Receiver<Vec<u8>>,
    outbound: Sender<Vec<u8>>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    pending: Vec<u8>,
    stream: bool,
    send_budget: Arc<AtomicUsize>,
}

/// 测试侧的对端（扮演设备）
pub struct MockPeer {
    to_driver: Sender<Vec<u8>>,
    from_driver: Receiver<Vec<u8>>,
    send_budget: Arc<AtomicUsize>,
}

impl MockTransport {
    /// 字节流语义：超过缓冲区的数据留到下一次接收
    pub fn stream() -> (MockTransport, MockPeer) {
        Self::pair(true)
    }

    /// 数据报语义：每次接收一个报文，超过缓冲区的部分被截断
    pub fn datagram() -> (MockTransport, MockPeer) {
        Self::pair(false)
    }

    fn pair(stream: bool) -> (MockTransport, MockPeer) {
        let (to_driver, inbound) = unbounded();
        let (outbound, from_driver) = unbounded();
        let (cancel_tx, cancel_rx) = bounded(1);
        let send_budget = Arc::new(AtomicUsize::new(UNLIMITED));
        (
            MockTransport {
                inbound,
                outbound,
                cancel_tx,
                cancel_rx,
                pending: Vec::new(),
                stream,
                send_budget: send_budget.clone(),
            },
            MockPeer {
                to_driver,
                from_driver,
                send_budget,
            },
        )
    }

    fn deliver(&mut self, mut bytes: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        if self.stream && n < bytes.len() {
            self.pending = bytes.split_off(n);
        }
        n
    }
}

impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let budget = self.send_budget.load(Ordering::Acquire);
        let n = if budget >= bytes.len() {
            bytes.len()
        } else if self.stream {
            budget
        } else {
            // 数据报不会部分发送
            0
        };
        if n == 0 && !bytes.is_empty() {
            return Err(TransportError::Timeout);
        }

        if budget != UNLIMITED {
            self.send_budget.fetch_sub(n, Ordering::AcqRel);
        }
        self.outbound
            .send(bytes[..n].to_vec())
            .map_err(|_| TransportError::Closed)?;

        if n < bytes.len() {
            Err(TransportError::Partial { written: n })
        } else {
            Ok(())
        }
    }

    fn receive_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            return Ok(self.deliver(pending, buf));
        }

        let bytes = if timeout.is_zero() {
            if self.cancel_rx.try_recv().is_ok() {
                return Err(TransportError::Cancelled);
            }
            match self.inbound.try_recv() {
                Ok(bytes) => bytes,
                Err(crossbeam_channel::TryRecvError::Empty) => return Err(TransportError::Timeout),
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    return Err(TransportError::Closed);
                },
            }
        } else {
            select! {
                recv(self.inbound) -> msg => match msg {
                    Ok(bytes) => bytes,
                    Err(_) => return Err(TransportError::Closed),
                },
                recv(self.cancel_rx) -> _ => return Err(TransportError::Cancelled),
                default(timeout) => return Err(TransportError::Timeout),
            }
        };

        Ok(self.deliver(bytes, buf))
    }

    fn interrupter(&self) -> Interrupter {
        Interrupter::new(Arc::new(self.cancel_tx.clone()))
    }
}

impl MockPeer {
    /// 向驱动发送一段字节（流）或一个报文（数据报）
    pub fn send(&self, bytes: impl Into<Vec<u8>>) {
        // 驱动已退出时静默丢弃
        let _ = self.to_driver.send(bytes.into());
    }

    /// 等待驱动发出的下一条消息
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.from_driver.recv_timeout(timeout) {
            Ok(bytes) => Some(bytes),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 取出驱动已经发出的全部消息
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.from_driver.try_iter().collect()
    }

    /// 模拟不读取的对端：之后最多再接受 `bytes` 个字节
    pub fn stall_after(&self, bytes: usize) {
        self.send_budget.store(bytes, Ordering::Release);
    }

    /// 恢复为不限制发送
    pub fn resume(&self) {
        self.send_budget.store(UNLIMITED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_stream_keeps_remainder() {
        let (mut transport, peer) = MockTransport::stream();
        peer.send(b"abcdef".to_vec());

        let mut buf = [0u8; 4];
        assert_eq!(transport.receive_timeout(&mut buf, Duration::from_millis(10)).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(transport.receive_timeout(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_datagram_truncates() {
        let (mut transport, peer) = MockTransport::datagram();
        peer.send(vec![1u8; 6]);
        peer.send(vec![2u8; 2]);

        let mut buf = [0u8; 4];
        assert_eq!(transport.receive_timeout(&mut buf, Duration::from_millis(10)).unwrap(), 4);
        assert_eq!(transport.receive_timeout(&mut buf, Duration::from_millis(10)).unwrap(), 2);
        assert_eq!(buf[0], 2);
    }

    #[test]
    fn test_peer_drop_is_closed() {
        let (mut transport, peer) = MockTransport::stream();
        drop(peer);
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive_timeout(&mut buf, Duration::from_millis(10)),
            Err(TransportError::Closed)
        ));
        assert!(matches!(transport.send(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_interrupt() {
        let (mut transport, _peer) = MockTransport::datagram();
        let interrupter = transport.interrupter();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 4];
            matches!(
                transport.receive_timeout(&mut buf, Duration::from_secs(10)),
                Err(TransportError::Cancelled)
            )
        });
        thread::sleep(Duration::from_millis(20));
        interrupter.interrupt();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_stalled_stream_sends_prefix() {
        let (mut transport, peer) = MockTransport::stream();
        peer.stall_after(3);

        assert!(matches!(
            transport.send(b"hello"),
            Err(TransportError::Partial { written: 3 })
        ));
        assert!(matches!(transport.send(b"lo"), Err(TransportError::Timeout)));
        assert_eq!(peer.drain(), vec![b"hel".to_vec()]);

        peer.resume();
        transport.send(b"lo").unwrap();
        assert_eq!(peer.drain(), vec![b"lo".to_vec()]);
    }

    #[test]
    fn test_stalled_datagram_is_not_split() {
        let (mut transport, peer) = MockTransport::datagram();
        peer.stall_after(3);
        assert!(matches!(transport.send(b"hello"), Err(TransportError::Timeout)));
        assert!(peer.drain().is_empty());
    }

    #[test]
    fn test_outbound_reaches_peer() {
        let (mut transport, peer) = MockTransport::stream();
        transport.send(b"cmd").unwrap();
        assert_eq!(peer.recv_timeout(Duration::from_millis(10)).unwrap(), b"cmd");
        assert!(peer.drain().is_empty());
    }
}
