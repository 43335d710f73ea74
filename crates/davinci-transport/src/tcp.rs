//! TCP 字节流传输（文本变体）

use crate::reactor::Reactor;
use crate::{Interrupter, Transport, TransportError};
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 默认发送超时
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// 非阻塞 TCP 客户端连接
pub struct TcpTransport {
    stream: TcpStream,
    reactor: Reactor,
    peer: SocketAddr,
    send_timeout: Duration,
    shut_down: bool,
}

impl TcpTransport {
    /// 在 `timeout` 内连接到 `addr`
    ///
    /// # 错误
    /// - `TransportError::Timeout`: 连接超时
    /// - `TransportError::Io`: 连接被拒绝等其他错误
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, TransportError> {
        debug!("Connecting to {} (timeout {:?})", addr, timeout);
        let std_stream = std::net::TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                TransportError::Timeout
            } else {
                TransportError::Io(e)
            }
        })?;
        Self::from_std(std_stream)
    }

    /// 包装一个已连接的标准库 stream
    pub fn from_std(std_stream: std::net::TcpStream) -> Result<Self, TransportError> {
        let peer = std_stream.peer_addr()?;
        std_stream.set_nodelay(true)?;
        std_stream.set_nonblocking(true)?;

        let mut stream = TcpStream::from_std(std_stream);
        let reactor = Reactor::register(&mut stream)?;
        debug!("Connected to {}", peer);

        Ok(Self {
            stream,
            reactor,
            peer,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            shut_down: false,
        })
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.shut_down {
            return Err(TransportError::NotConnected);
        }

        let deadline = Instant::now() + self.send_timeout;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(if written == 0 {
                            TransportError::Timeout
                        } else {
                            TransportError::Partial { written }
                        });
                    }
                    self.reactor.wait(remaining)?;
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        trace!("Sent {} bytes to {}", written, self.peer);
        Ok(())
    }

    fn receive_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if self.shut_down {
            return Err(TransportError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => return Err(TransportError::Closed),
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
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let _ = self.reactor.deregister(&mut self.stream);
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
