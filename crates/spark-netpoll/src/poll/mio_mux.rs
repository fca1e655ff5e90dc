use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use super::{Interest, Multiplexer, Readiness};

/// 唤醒器占用的令牌，注册表生成的令牌不会与之冲突。
const WAKE_TOKEN: Token = Token(usize::MAX - 1);
const EVENTS_CAPACITY: usize = 1024;

/// 基于 `mio::Poll` 的多路复用器。
///
/// `Poll` 与事件缓冲只由所属轮询线程在 `wait` 中使用；注册、修改、注销通过克隆出的
/// `Registry` 完成，可在任意线程调用而无需打断正在进行的 `wait`。
pub struct MioMultiplexer {
    poll: Mutex<(Poll, Events)>,
    registry: Registry,
    waker: Waker,
}

impl MioMultiplexer {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll: Mutex::new((poll, Events::with_capacity(EVENTS_CAPACITY))),
            registry,
            waker,
        })
    }
}

impl core::fmt::Debug for MioMultiplexer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MioMultiplexer").finish_non_exhaustive()
    }
}

fn to_mio(interest: Interest) -> mio::Interest {
    match interest {
        Interest::Readable => mio::Interest::READABLE,
        Interest::ReadWrite => mio::Interest::READABLE | mio::Interest::WRITABLE,
    }
}

impl Multiplexer for MioMultiplexer {
    fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.registry
            .register(&mut SourceFd(&fd), Token(token), to_mio(interest))
    }

    fn modify(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.registry
            .reregister(&mut SourceFd(&fd), Token(token), to_mio(interest))
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.registry.deregister(&mut SourceFd(&fd))
    }

    fn wait(&self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        let mut guard = self.poll.lock();
        let (poll, events) = &mut *guard;
        match poll.poll(events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(error) => return Err(error),
        }
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            ready.push(Readiness {
                token: event.token().0,
                readable: event.is_readable(),
                writable: event.is_writable(),
                read_closed: event.is_read_closed(),
                write_closed: event.is_write_closed(),
                error: event.is_error(),
            });
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}
