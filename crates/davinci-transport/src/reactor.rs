//! 单 socket 的 mio 事件等待

use crate::{Interrupter, TransportError};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;

const SOCKET_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl Reactor {
    /// 注册 socket 并创建 waker
    pub(crate) fn register<S: Source + ?Sized>(source: &mut S) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(source, SOCKET_TOKEN, Interest::READABLE | Interest::WRITABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(8),
            waker,
        })
    }

    pub(crate) fn interrupter(&self) -> Interrupter {
        Interrupter::new(self.waker.clone())
    }

    /// 等待 socket 就绪或超时
    ///
    /// mio 是边沿触发的，调用者在返回后必须重新尝试 IO 直到 `WouldBlock`。
    /// 返回 `Ok(())` 不代表一定有数据（可能是超时或虚假唤醒）。
    pub(crate) fn wait(&mut self, timeout: Duration) -> Result<(), TransportError> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if self.events.iter().any(|event| event.token() == WAKER_TOKEN) {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }
}
