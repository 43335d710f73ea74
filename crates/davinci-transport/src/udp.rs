//! UDP 数据报传输（二进制变体）

use crate::reactor::Reactor;
use crate::{Interrupter, Transport, TransportError};
use mio::net::UdpSocket;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 已 connect 到固定对端的 UDP socket
///
/// 一次 `receive_timeout` 对应一个完整数据报。超过缓冲区的数据报会被截断，
/// 调用者应使用比期望帧长更大的缓冲区以识别超长报文。
pub struct UdpTransport {
    socket: UdpSocket,
    reactor: Reactor,
    local: SocketAddr,
    remote: SocketAddr,
    send_timeout: Duration,
}

impl UdpTransport {
    /// 绑定本地端口并 connect 到设备地址
    pub fn bind(local: SocketAddr, remote: SocketAddr) -> Result<Self, TransportError> {
        let std_socket = std::net::UdpSocket::bind(local)?;
        std_socket.connect(remote)?;
        std_socket.set_nonblocking(true)?;
        let local = std_socket.local_addr()?;

        let mut socket = UdpSocket::from_std(std_socket);
        let reactor = Reactor::register(&mut socket)?;
        debug!("UDP socket {} connected to {}", local, remote);

        Ok(Self {
            socket,
            reactor,
            local,
            remote,
            send_timeout: crate::tcp::DEFAULT_SEND_TIMEOUT,
        })
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.send_timeout;
        loop {
            match self.socket.send(bytes) {
                Ok(n) => {
                    trace!("Sent {} byte datagram to {}", n, self.remote);
                    return Ok(());
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            self.reactor.wait(remaining)?;
        }
    }

    fn receive_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.socket.recv(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            self.reactor.wait(remaining)?;
        }
    }

    fn interrupter(&self) -> Interrupter {
        self.reactor.interrupter()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        let _ = self.reactor.deregister(&mut self.socket);
        Ok(())
    }
}
