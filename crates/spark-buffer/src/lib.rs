#![deny(unsafe_code)]

//! `spark-buffer` 提供分段链式零拷贝缓冲。
//!
//! # 模块定位（Why）
//! - 网络连接的输入输出都以字节流为单位，但 socket 读写、协议解析与业务写入的粒度各不相同；
//!   链式缓冲把连续字节流拆成若干段，读写两端只在段的边界上交接所有权；
//! - 大块外部数据以共享视图挂接，解析出的报文以视图交出，热路径上避免复制。
//!
//! # 设计概要（How）
//! - [`LinkBuffer`] 是读写合一的入口，可 [`LinkBuffer::split`] 为单生产者 [`LinkWriter`]
//!   与单消费者 [`LinkReader`]，两者通过提交队列协作；
//! - 段内存由 [`SegmentPool`] 按尺寸分级复用，仍被视图引用的段不会被重复分配；
//! - [`Reader`]/[`Writer`] 描述读写契约，网络连接以阻塞语义实现同一契约。
//!
//! # 命名约定（Consistency）
//! - `malloc`/`flush` 指写端的预留与提交，`next`/`peek`/`skip`/`release` 指读端的消费与释放，
//!   与 `spark-netpoll` 的连接接口保持一致。

mod config;
mod contract;
mod error;
mod link;
mod pool;
mod reader;
mod segment;
mod writer;

pub use config::{
    BufferConfig, DEFAULT_MAX_TAIL_CAPACITY, DEFAULT_NOCOPY_THRESHOLD, DEFAULT_SEGMENT_SIZE,
};
pub use contract::{Reader, Writer};
pub use error::{BufferError, Result, codes};
pub use link::LinkBuffer;
pub use pool::{PoolStats, SegmentPool};
pub use reader::{LinkReader, ReadableLength};
pub use writer::{LinkWriter, Reservation};
