use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::NetpollConfig;
use crate::connection::{Connection, Options};
use crate::dial::dial_tcp;
use crate::error::{LISTEN, NetpollError};
use crate::poll::PollManager;
use crate::server::Server;
use crate::socket::Socket;
use crate::worker::{Executor, WorkerPool};

/// 引擎入口：一组轮询线程加一个工作线程池。
///
/// # 契约（What）
/// - 经由运行时创建的连接与服务端默认把请求处理交给运行时自己的线程池；
/// - `shutdown` 停止全部轮询线程并让工作线程在处理完排队任务后退出，
///   仍登记在轮询线程上的连接不再收到任何事件。
///
/// ```no_run
/// use spark_netpoll::{NetpollConfig, Options, Runtime};
///
/// let runtime = Runtime::new(NetpollConfig::default())?;
/// let server = runtime.listen("127.0.0.1:0".parse().unwrap(), Options::new())?;
/// println!("listening on {}", server.local_addr());
/// # Ok::<(), spark_netpoll::NetpollError>(())
/// ```
#[derive(Debug)]
pub struct Runtime {
    config: NetpollConfig,
    pollers: Arc<PollManager>,
    workers: WorkerPool,
}

impl Runtime {
    pub fn new(config: NetpollConfig) -> Result<Self, NetpollError> {
        config.validate()?;
        let pollers = PollManager::new(config.pollers)?;
        let workers = WorkerPool::from_config(&config);
        info!(
            pollers = config.pollers,
            max_workers = config.max_workers,
            "netpoll runtime started"
        );
        Ok(Self {
            config,
            pollers,
            workers,
        })
    }

    pub fn from_toml_str(source: &str) -> Result<Self, NetpollError> {
        Self::new(NetpollConfig::from_toml_str(source)?)
    }

    pub fn config(&self) -> &NetpollConfig {
        &self.config
    }

    pub fn pollers(&self) -> &Arc<PollManager> {
        &self.pollers
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    fn options(&self, options: Options) -> Options {
        options.with_default_executor(Arc::new(self.workers.clone()) as Arc<dyn Executor>)
    }

    /// 把一个已建立的非阻塞 socket 交给引擎驱动。
    pub fn attach<S: Socket>(&self, socket: S, options: Options) -> Result<Connection, NetpollError> {
        let conn = Connection::new(socket, &self.config);
        conn.register(self.options(options), &self.pollers.pick())?;
        Ok(conn)
    }

    pub fn dial_tcp(
        &self,
        addr: SocketAddr,
        timeout: Option<Duration>,
        options: Options,
    ) -> Result<Connection, NetpollError> {
        let stream = dial_tcp(addr, timeout)?;
        self.attach(stream, options)
    }

    pub fn listen(&self, addr: SocketAddr, options: Options) -> Result<Server, NetpollError> {
        let listener =
            std::net::TcpListener::bind(addr).map_err(|source| NetpollError::io(LISTEN, source))?;
        self.serve(listener, options)
    }

    /// 在已绑定的监听 socket 上接受连接。
    pub fn serve(
        &self,
        listener: std::net::TcpListener,
        options: Options,
    ) -> Result<Server, NetpollError> {
        Server::start(
            listener,
            self.options(options),
            self.config.clone(),
            Arc::clone(&self.pollers),
        )
    }

    pub fn shutdown(&self) {
        self.pollers.close();
        self.workers.shutdown();
        info!("netpoll runtime stopped");
    }
}
