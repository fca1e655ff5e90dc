//! 就绪事件多路复用层。
//!
//! # 模块定位（Why）
//! - 每个轮询线程独占一个 [`Multiplexer`]，阻塞等待一批就绪事件后按令牌分发给 [`FdOperator`]；
//! - 连接的读写系统调用在轮询线程上完成，结果写入链式缓冲后再交给工作线程处理，
//!   轮询线程从不执行业务回调中的耗时逻辑。
//!
//! # 结构（How）
//! - `mio_mux`：基于 `mio` 的默认多路复用实现；
//! - `operator`：单个 fd 的注册句柄与事件分发；
//! - `poll_loop`：轮询线程主循环与注册表；
//! - `manager`：多个轮询线程的创建、轮转选择与关闭。

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

mod manager;
mod mio_mux;
mod operator;
mod poll_loop;

pub use manager::PollManager;
pub use mio_mux::MioMultiplexer;
pub(crate) use operator::{AcceptHandler, IoHandler};
pub use operator::{FdOperator, PollEvent};
pub use poll_loop::PollLoop;

/// 注册到多路复用器的关注事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Readable,
    ReadWrite,
}

/// 一次就绪通知。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

/// 操作系统就绪通知机制的抽象（epoll、kqueue 等）。
///
/// # 契约（What）
/// - 通知为边沿触发：同一就绪状态只报告一次，处理方须读写到 `WouldBlock` 为止；
/// - `wait` 可以被 `wake` 从其它线程唤醒，唤醒本身不产生 [`Readiness`]；
/// - `wait` 被信号中断时返回 `Ok(())` 且不追加事件。
pub trait Multiplexer: Send + Sync + 'static {
    fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    fn modify(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// 阻塞等待就绪事件并追加到 `ready`，`timeout` 为 `None` 时无限等待。
    fn wait(&self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;

    fn wake(&self) -> io::Result<()>;
}
