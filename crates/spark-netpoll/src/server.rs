use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::NetpollConfig;
use crate::connection::{Connection, Options};
use crate::error::{LISTEN, NetpollError};
use crate::poll::{AcceptHandler, FdOperator, Interest, PollManager};

/// 监听 socket 及其接收循环。
///
/// # 逻辑（How）
/// - 监听 fd 登记在某个轮询线程上，读就绪时在该线程上循环 `accept` 直到 `WouldBlock`；
/// - 每条新连接按轮转分配到一个轮询线程，以服务端统一的 [`Options`] 注册。
///
/// # 契约（What）
/// - `shutdown` 之后不再接受新连接，已建立的连接不受影响；
/// - 丢弃 `Server` 等价于调用 `shutdown`。
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    listener: mio::net::TcpListener,
    local_addr: SocketAddr,
    options: Options,
    config: NetpollConfig,
    pollers: Arc<PollManager>,
    operator: Mutex<Option<Arc<FdOperator>>>,
    accepted: AtomicU64,
}

impl core::fmt::Debug for Server {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.inner.local_addr)
            .field("accepted", &self.accepted())
            .finish()
    }
}

impl Server {
    pub(crate) fn start(
        listener: std::net::TcpListener,
        options: Options,
        config: NetpollConfig,
        pollers: Arc<PollManager>,
    ) -> Result<Self, NetpollError> {
        listener
            .set_nonblocking(true)
            .map_err(|source| NetpollError::io(LISTEN, source))?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NetpollError::io(LISTEN, source))?;
        let inner = Arc::new(ServerInner {
            listener: mio::net::TcpListener::from_std(listener),
            local_addr,
            options,
            config,
            pollers,
            operator: Mutex::new(None),
            accepted: AtomicU64::new(0),
        });

        let poll = inner.pollers.pick();
        let handler: Arc<dyn AcceptHandler> = Arc::clone(&inner) as Arc<dyn AcceptHandler>;
        let operator = poll.insert_listener(inner.listener.as_raw_fd(), handler)?;
        *inner.operator.lock() = Some(Arc::clone(&operator));
        if let Err(error) = operator.arm(Interest::Readable) {
            inner.operator.lock().take();
            return Err(error);
        }
        info!(%local_addr, poller = poll.id(), "server listening");
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// 已接受并成功注册的连接数。
    pub fn accepted(&self) -> u64 {
        self.inner.accepted.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let operator = self.inner.operator.lock().take();
        if let Some(operator) = operator {
            if let Err(error) = operator.detach() {
                warn!(code = error.code(), %error, "failed to detach listener");
            }
            info!(local_addr = %self.inner.local_addr, "server stopped accepting");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AcceptHandler for ServerInner {
    fn on_accept(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(error) = stream.set_nodelay(true) {
                        debug!(%peer, %error, "failed to set TCP_NODELAY");
                    }
                    let conn = Connection::new(stream, &self.config);
                    let poll = self.pollers.pick();
                    match conn.register(self.options.clone(), &poll) {
                        Ok(()) => {
                            self.accepted.fetch_add(1, Ordering::Relaxed);
                            debug!(fd = conn.fd(), %peer, "connection accepted");
                        }
                        Err(error) => {
                            warn!(%peer, code = error.code(), %error, "failed to register accepted connection");
                        }
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(local_addr = %self.local_addr, %error, "accept failed");
                    break;
                }
            }
        }
    }
}
