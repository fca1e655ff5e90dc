use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::{Interest, PollLoop, Readiness};
use crate::error::{CONTROL, NetpollError};
use crate::socket::Socket;

/// 连接侧的 I/O 回调，由轮询线程在读写就绪时调用。
///
/// # 契约（What）
/// - `inputs` 预订输入缓冲的可写区域，交给 `fill` 执行 `readv`，确认实际读入量并返回；
///   读入 0 字节表示对端关闭；
/// - `input_ack` 在每次成功读入后调用，负责唤醒阻塞读者或调度请求处理；
/// - `outputs` 以分散视图交出待发送数据并执行 `writev`，在同一临界区内确认已写出的字节，
///   没有待发送数据时返回 0；
/// - `output_ack` 在每次写出后调用，发送完毕后撤销写关注并唤醒等待 `flush` 的线程；
/// - `on_hup` 在对端关闭或出错时调用一次，此时注册已经撤销。
pub(crate) trait IoHandler: Send + Sync + 'static {
    fn inputs(
        &self,
        fill: &mut dyn FnMut(&mut [IoSliceMut<'_>]) -> io::Result<usize>,
    ) -> io::Result<usize>;

    fn input_ack(&self, n: usize);

    fn outputs(&self, drain: &mut dyn FnMut(&[IoSlice<'_>]) -> io::Result<usize>)
    -> io::Result<usize>;

    fn output_ack(&self, n: usize);

    fn on_hup(&self);
}

/// 监听 socket 的回调：读就绪即表示有待接受的连接。
pub(crate) trait AcceptHandler: Send + Sync + 'static {
    fn on_accept(&self);
}

pub(crate) enum OperatorKind {
    Stream {
        socket: Arc<dyn Socket>,
        handler: Arc<dyn IoHandler>,
    },
    Listener(Arc<dyn AcceptHandler>),
}

/// 关注事件的变更指令。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollEvent {
    /// 追加写关注：输出积压，等待 socket 可写。
    ReadToReadWrite,
    /// 撤销写关注：输出已全部发出。
    ReadWriteToRead,
    /// 从轮询线程注销。
    Detach,
}

/// 一个 fd 在某个轮询线程上的注册句柄。
///
/// # 契约（What）
/// - 令牌由注册表槽位与代数组成，槽位复用后旧令牌的残留事件不会被误投；
/// - `detach` 幂等：首次调用注销 fd 并移出注册表，之后的调用直接返回成功；
/// - 句柄只弱引用轮询线程，轮询线程退出后 `control` 返回 `InvalidState`。
pub struct FdOperator {
    fd: RawFd,
    token: usize,
    kind: OperatorKind,
    poll: Weak<PollLoop>,
    detached: AtomicBool,
}

impl core::fmt::Debug for FdOperator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FdOperator")
            .field("fd", &self.fd)
            .field("token", &self.token)
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl FdOperator {
    pub(crate) fn new(fd: RawFd, token: usize, kind: OperatorKind, poll: Weak<PollLoop>) -> Self {
        Self {
            fd,
            token,
            kind,
            poll,
            detached: AtomicBool::new(false),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn poll_loop(&self) -> Result<Arc<PollLoop>, NetpollError> {
        self.poll
            .upgrade()
            .ok_or(NetpollError::InvalidState("poller has shut down"))
    }

    /// 以给定关注事件向多路复用器登记。失败时句柄视为已注销。
    pub(crate) fn arm(&self, interest: Interest) -> Result<(), NetpollError> {
        let poll = self.poll_loop()?;
        if let Err(error) = poll.arm(self, interest) {
            self.detached.store(true, Ordering::Release);
            poll.forget(self);
            return Err(error);
        }
        Ok(())
    }

    pub fn control(&self, event: PollEvent) -> Result<(), NetpollError> {
        let interest = match event {
            PollEvent::Detach => return self.detach(),
            PollEvent::ReadToReadWrite => Interest::ReadWrite,
            PollEvent::ReadWriteToRead => Interest::Readable,
        };
        if self.is_detached() {
            return Err(NetpollError::InvalidState("operator is detached"));
        }
        self.poll_loop()?
            .mux()
            .modify(self.fd, self.token, interest)
            .map_err(|source| NetpollError::registration(CONTROL, source))
    }

    pub fn detach(&self) -> Result<(), NetpollError> {
        if self.detached.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(poll) = self.poll.upgrade() else {
            return Ok(());
        };
        poll.forget(self);
        poll.mux()
            .deregister(self.fd)
            .map_err(|source| NetpollError::registration(CONTROL, source))
    }

    /// 轮询线程退出时处理仍登记的句柄：连接按对端关闭处理，随后由其清理路径释放资源；
    /// 监听句柄只标记为注销。
    pub(crate) fn abandon(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(poll) = self.poll.upgrade() {
            if let Err(error) = poll.mux().deregister(self.fd) {
                debug!(fd = self.fd, %error, "deregister on shutdown failed");
            }
        }
        if let OperatorKind::Stream { handler, .. } = &self.kind {
            handler.on_hup();
        }
    }

    pub(crate) fn dispatch(&self, readiness: &Readiness) {
        if self.is_detached() {
            return;
        }
        match &self.kind {
            OperatorKind::Listener(handler) => {
                if readiness.readable {
                    handler.on_accept();
                }
            }
            OperatorKind::Stream { socket, handler } => {
                self.dispatch_stream(socket.as_ref(), handler.as_ref(), readiness);
            }
        }
    }

    fn dispatch_stream(&self, socket: &dyn Socket, handler: &dyn IoHandler, readiness: &Readiness) {
        let mut hup = readiness.error;

        if readiness.readable || readiness.read_closed {
            loop {
                match handler.inputs(&mut |bufs| socket.read_vectored(bufs)) {
                    Ok(0) => {
                        hup = true;
                        break;
                    }
                    Ok(n) => handler.input_ack(n),
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        debug!(fd = self.fd, %error, "socket read failed");
                        hup = true;
                        break;
                    }
                }
                if self.is_detached() {
                    return;
                }
            }
        }

        if !hup && (readiness.writable || readiness.write_closed) {
            loop {
                match handler.outputs(&mut |bufs| socket.write_vectored(bufs)) {
                    Ok(0) => break,
                    Ok(n) => handler.output_ack(n),
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        debug!(fd = self.fd, %error, "socket write failed");
                        hup = true;
                        break;
                    }
                }
            }
        }

        if hup && !self.is_detached() {
            if let Err(error) = self.detach() {
                warn!(fd = self.fd, code = error.code(), %error, "detach after hangup failed");
            }
            handler.on_hup();
        }
    }
}
