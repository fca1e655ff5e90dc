//! 读写契约。
//!
//! `Reader`/`Writer` 同时由链式缓冲的各个视图与网络连接实现：
//! 缓冲上的实现是非阻塞的，可读字节不足时立即返回 `InsufficientData`；
//! 连接上的实现会按读超时阻塞等待，直至数据到达、超时或连接关闭。
//! 两者共享同一套方法语义，业务代码可以对二者写出相同的解析逻辑。

use bytes::Bytes;

use crate::reader::LinkReader;

/// 消费端契约。
///
/// # 契约（What）
/// - `next`/`skip`/`read_until`/`read_copy`/`slice` 推进读指针；`peek` 不推进；
/// - `next` 在数据位于单段内时零拷贝返回，跨段时返回一份连续拷贝；
/// - `peek` 返回的切片在下一次推进读指针前有效（由借用规则保证）；
/// - `release` 释放已消费段与 `peek` 缓存，已交出的 `Bytes` 视图不受影响。
pub trait Reader {
    type Error;

    fn next(&mut self, n: usize) -> Result<Bytes, Self::Error>;

    fn peek(&mut self, n: usize) -> Result<&[u8], Self::Error>;

    fn skip(&mut self, n: usize) -> Result<(), Self::Error>;

    /// 读取直到并包含首个 `delim` 字节。
    fn read_until(&mut self, delim: u8) -> Result<Bytes, Self::Error>;

    /// 读取 `n` 字节的独立拷贝，与缓冲内存不再有任何关联。
    fn read_copy(&mut self, n: usize) -> Result<Vec<u8>, Self::Error>;

    /// 切出 `n` 字节作为只读的独立读端，底层内存共享。执行后自动 `release`。
    fn slice(&mut self, n: usize) -> Result<LinkReader, Self::Error>;

    fn release(&mut self);

    /// 已提交、尚未消费的字节数。
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 生产端契约。
///
/// # 契约（What）
/// - `malloc` 预留的字节在 `flush` 之前对读端不可见；
/// - `malloc_ack(n)` 仅保留已预留字节中的前 `n` 个，其余回滚；
/// - `write_binary` 超过零拷贝阈值时直接挂接调用方的内存，调用方不得再修改其内容
///   （`Bytes` 的不可变性在类型层面保证了这一点）；
/// - `write_direct(extra, remaining)` 把 `extra` 插入到“预留区尾部往前 `remaining` 字节”处，
///   用于先写正文、后补头部的场景。
pub trait Writer {
    type Error;

    fn malloc(&mut self, n: usize) -> Result<&mut [u8], Self::Error>;

    fn malloc_ack(&mut self, n: usize) -> Result<(), Self::Error>;

    fn write_binary(&mut self, data: Bytes) -> Result<usize, Self::Error>;

    fn write_slice(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    fn write_direct(&mut self, extra: Bytes, remaining: usize) -> Result<(), Self::Error>;

    fn flush(&mut self) -> Result<(), Self::Error>;

    /// 已预留、尚未提交的字节数。
    fn reserved_len(&self) -> usize;
}
