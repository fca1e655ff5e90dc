//! 连接：一对链式缓冲、一组生命周期回调与一台原子状态机。
//!
//! # 模块定位（Why）
//! - 轮询线程只负责把 socket 数据搬进输入缓冲、把输出缓冲搬进 socket；
//!   业务回调在执行器上运行，二者通过缓冲与状态寄存器交接；
//! - 连接可能同时被应用关闭、被对端关闭、被回调异常强制关闭，
//!   清理必须恰好执行一次且不与仍在运行的请求处理并发。
//!
//! # 结构（How）
//! - `state`：生命周期、关闭发起方与处理独占标记三组原子寄存器；
//! - `lifecycle`：`on_connect`/`on_request` 的调度、处理循环、关闭与清理；
//! - `io`：轮询线程侧的读写回调、阻塞等待与对外的读写守卫。

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spark_buffer::{LinkBuffer, LinkReader, LinkWriter, ReadableLength, SegmentPool};

use crate::config::NetpollConfig;
use crate::error::NetpollError;
use crate::poll::FdOperator;
use crate::socket::Socket;
use crate::worker::Executor;

mod io;
mod lifecycle;
mod state;

pub use io::{ConnReader, ConnWriter};
pub use state::ConnState;

use io::{OutputDrain, Signal};
use state::{CloseFlag, ProcessFlag, StateCell};

/// 连接建立后调用一次。
pub type OnConnect = Arc<dyn Fn(&Connection) + Send + Sync>;
/// 输入缓冲有数据时调用；返回的错误仅被记录，连接是否关闭由回调自行决定。
pub type OnRequest = Arc<dyn Fn(&Connection) -> Result<(), NetpollError> + Send + Sync>;
/// 连接断开时调用一次，早于全部关闭回调。
pub type OnDisconnect = Arc<dyn Fn(&Connection) + Send + Sync>;
/// 清理阶段按注册的逆序调用。
pub type CloseCallback = Box<dyn FnOnce(&Connection) + Send>;

/// 注册连接时绑定的回调与参数。
///
/// ```no_run
/// use spark_netpoll::{Options, Reader, Writer};
///
/// let options = Options::new().on_request(|conn| {
///     let mut reader = conn.reader();
///     let line = reader.read_until(b'\n')?;
///     drop(reader);
///     let mut writer = conn.writer();
///     writer.write_binary(line)?;
///     writer.flush()
/// });
/// # let _ = options;
/// ```
#[derive(Clone, Default)]
pub struct Options {
    on_connect: Option<OnConnect>,
    on_request: Option<OnRequest>,
    on_disconnect: Option<OnDisconnect>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    executor: Option<Arc<dyn Executor>>,
}

impl core::fmt::Debug for Options {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Options")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_request", &self.on_request.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    pub fn on_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), NetpollError> + Send + Sync + 'static,
    {
        self.on_request = Some(Arc::new(hook));
        self
    }

    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// 覆盖配置中的默认读超时。
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// 请求处理使用的执行器，缺省为进程级 [`crate::WorkerPool::global`]。
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// 未显式指定执行器时使用 `executor`。
    pub(crate) fn with_default_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        if self.executor.is_none() {
            self.executor = Some(executor);
        }
        self
    }
}

#[derive(Default)]
struct Hooks {
    on_connect: Option<OnConnect>,
    on_request: Option<OnRequest>,
    on_disconnect: Option<OnDisconnect>,
}

#[derive(Debug, Default)]
struct Deadlines {
    read_timeout: Option<Duration>,
    read_deadline: Option<Instant>,
    write_timeout: Option<Duration>,
    write_deadline: Option<Instant>,
}

impl Deadlines {
    /// 绝对截止时间优先于相对超时。
    fn read(&self) -> Option<Instant> {
        self.read_deadline
            .or_else(|| self.read_timeout.map(|timeout| Instant::now() + timeout))
    }

    fn write(&self) -> Option<Instant> {
        self.write_deadline
            .or_else(|| self.write_timeout.map(|timeout| Instant::now() + timeout))
    }
}

/// 一条受引擎驱动的连接。`Clone` 仅复制句柄。
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    me: Weak<Inner>,
    socket: Arc<dyn Socket>,
    fd: RawFd,

    input: Mutex<LinkReader>,
    input_writer: Mutex<LinkWriter>,
    input_len: ReadableLength,
    output: Mutex<LinkWriter>,
    drain: Mutex<OutputDrain>,
    output_len: ReadableLength,

    state: StateCell,
    close_by: CloseFlag,
    process: ProcessFlag,
    fault: OnceLock<String>,

    hooks: OnceLock<Hooks>,
    executor: OnceLock<Arc<dyn Executor>>,
    operator: Mutex<Option<Arc<FdOperator>>>,
    close_callbacks: Mutex<Option<Vec<CloseCallback>>>,
    deadlines: Mutex<Deadlines>,

    wait_read_size: AtomicUsize,
    read_signal: Signal,
    write_signal: Signal,

    book_size: AtomicUsize,
    max_size: AtomicUsize,
    last_booked: AtomicUsize,
    max_book_size: usize,
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.inner.fd)
            .field("state", &self.inner.state.get())
            .field("readable", &self.inner.input_len.get())
            .field("pending_output", &self.inner.output_len.get())
            .finish()
    }
}

impl Connection {
    /// 包装一个非阻塞 socket。连接在 [`Connection::register`] 之前不会收发任何数据。
    pub fn new<S: Socket>(socket: S, config: &NetpollConfig) -> Self {
        Self::from_socket(Arc::new(socket), config)
    }

    pub fn from_socket(socket: Arc<dyn Socket>, config: &NetpollConfig) -> Self {
        let pool = SegmentPool::global();
        let (input_writer, input) =
            LinkBuffer::with_pool(config.buffer.clone(), pool.clone()).split();
        let (output, drain) = LinkBuffer::with_pool(config.buffer.clone(), pool).split();
        let input_len = input.length_probe();
        let output_len = drain.length_probe();
        let fd = socket.fd();
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            socket,
            fd,
            input: Mutex::new(input),
            input_writer: Mutex::new(input_writer),
            input_len,
            output: Mutex::new(output),
            drain: Mutex::new(OutputDrain::new(drain)),
            output_len,
            state: StateCell::new(),
            close_by: CloseFlag::new(),
            process: ProcessFlag::new(),
            fault: OnceLock::new(),
            hooks: OnceLock::new(),
            executor: OnceLock::new(),
            operator: Mutex::new(None),
            close_callbacks: Mutex::new(Some(Vec::new())),
            deadlines: Mutex::new(Deadlines {
                read_timeout: config.read_timeout(),
                write_timeout: config.write_timeout(),
                ..Deadlines::default()
            }),
            wait_read_size: AtomicUsize::new(0),
            read_signal: Signal::new(),
            write_signal: Signal::new(),
            book_size: AtomicUsize::new(config.initial_book_size),
            max_size: AtomicUsize::new(config.initial_book_size),
            last_booked: AtomicUsize::new(0),
            max_book_size: config.max_book_size,
        });
        Self { inner }
    }

    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    /// 尚未被任何一方关闭。
    pub fn is_active(&self) -> bool {
        !self.inner.close_by.is_closed()
    }

    pub fn state(&self) -> ConnState {
        self.inner.state.get()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.socket.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.socket.peer_addr()
    }

    /// 输入侧的阻塞读守卫。守卫存续期间其它读者等待。
    pub fn reader(&self) -> ConnReader<'_> {
        ConnReader::new(&self.inner)
    }

    /// 输出侧的写守卫，`flush` 会把数据发往 socket。
    pub fn writer(&self) -> ConnWriter<'_> {
        ConnWriter::new(&self.inner)
    }

    /// 注册关闭回调。清理已经执行过时返回 `ConnectionClosed`。
    pub fn add_close_callback<F>(&self, callback: F) -> Result<(), NetpollError>
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        match self.inner.close_callbacks.lock().as_mut() {
            Some(callbacks) => {
                callbacks.push(Box::new(callback));
                Ok(())
            }
            None => Err(self.inner.closed_error()),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.inner.deadlines.lock().read_timeout = timeout;
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.inner.deadlines.lock().read_deadline = deadline;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.inner.deadlines.lock().write_timeout = timeout;
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.inner.deadlines.lock().write_deadline = deadline;
    }

    /// 主动关闭：唤醒阻塞的读写方，没有处理循环在运行时立即清理。重复调用无副作用。
    pub fn close(&self) {
        self.inner.close();
    }
}
