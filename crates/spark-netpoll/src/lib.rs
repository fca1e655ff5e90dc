#![deny(unsafe_code)]

//! `spark-netpoll`：基于就绪事件多路复用的非阻塞连接引擎。
//!
//! # 模块定位（Why）
//! - 少量轮询线程以边沿触发的方式监听大量 socket，读写系统调用在轮询线程上完成，
//!   数据经由 `spark-buffer` 的链式缓冲在轮询线程与业务线程之间交接；
//! - 业务回调（`on_connect`/`on_request`/`on_disconnect`）在工作线程池上运行，
//!   轮询线程从不等待业务代码。
//!
//! # 结构（How）
//! - [`poll`]：多路复用抽象、`mio` 实现、fd 注册句柄与轮询线程；
//! - [`Connection`]：连接状态机、处理循环与阻塞读写守卫；
//! - [`WorkerPool`]：弹性工作线程池，实现 [`Executor`]；
//! - [`Runtime`]/[`Server`]/[`dial_tcp`]：面向应用的组装入口。
//!
//! # 错误与日志
//! - 所有公开操作返回 [`NetpollError`]，通过 [`NetpollError::code`] 暴露稳定错误码；
//! - 生命周期与注册失败经 `tracing` 记录，回调 panic 以 `error` 级别记录后强制关闭连接。

mod config;
mod connection;
mod dial;
mod error;
pub mod poll;
mod runtime;
mod server;
mod socket;
mod worker;

pub use config::{ConfigError, DEFAULT_BOOK_SIZE, MAX_BOOK_SIZE, NetpollConfig};
pub use connection::{
    CloseCallback, ConnReader, ConnState, ConnWriter, Connection, OnConnect, OnDisconnect,
    OnRequest, Options,
};
pub use dial::dial_tcp;
pub use error::{
    CONTROL, CloseReason, DIAL, FLUSH, LISTEN, NetpollError, OperationKind, POLLER, READ,
    REGISTER, codes,
};
pub use runtime::Runtime;
pub use server::Server;
pub use socket::Socket;
pub use spark_buffer::{BufferConfig, LinkReader, Reader, Writer};
pub use worker::{Executor, Task, WorkerPool};
