use std::io::IoSlice;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::BufferConfig;
use crate::contract::{Reader, Writer};
use crate::error::{BufferError, Result};
use crate::pool::SegmentPool;
use crate::reader::{LinkReader, ReadableLength};
use crate::segment::Shared;
use crate::writer::{LinkWriter, Reservation};

/// 分段链式缓冲：同一对象上既可写入也可读取。
///
/// # 模块角色（Why）
/// - 单线程场景（编解码、测试）直接在 `LinkBuffer` 上交替读写；
/// - 跨线程场景通过 [`LinkBuffer::split`] 拆成 [`LinkWriter`] 与 [`LinkReader`]，
///   生产者与消费者各持一半，只在提交队列上短暂同步。
///
/// # 契约（What）
/// - 读端观察到的字节序列恰好是已提交字节按提交顺序的拼接；
/// - 预留而未提交的字节对读端不可见。
#[derive(Debug)]
pub struct LinkBuffer {
    writer: LinkWriter,
    reader: LinkReader,
}

impl Default for LinkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkBuffer {
    /// 使用默认配置与进程级共享池构造。
    pub fn new() -> Self {
        Self::with_pool(BufferConfig::default(), SegmentPool::global())
    }

    /// 使用指定配置构造；配置非法时返回 `InvalidArgument`。
    pub fn with_config(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_pool(config, SegmentPool::global()))
    }

    pub fn with_pool(config: BufferConfig, pool: SegmentPool) -> Self {
        let shared = Arc::new(Shared::new());
        Self {
            writer: LinkWriter::new(Arc::clone(&shared), pool, config),
            reader: LinkReader::new(shared),
        }
    }

    /// 拆分为写端与读端。
    pub fn split(self) -> (LinkWriter, LinkReader) {
        (self.writer, self.reader)
    }

    pub fn writer(&mut self) -> &mut LinkWriter {
        &mut self.writer
    }

    pub fn reader(&mut self) -> &mut LinkReader {
        &mut self.reader
    }

    pub fn length_probe(&self) -> ReadableLength {
        self.reader.length_probe()
    }

    pub fn book(&mut self, book_size: usize, max_size: usize) -> &mut [u8] {
        self.writer.book(book_size, max_size)
    }

    pub fn book_ack(&mut self, n: usize) -> Result<usize> {
        self.writer.book_ack(n)
    }

    pub fn reserve(&mut self, book_size: usize, max_size: usize) -> Reservation<'_> {
        self.writer.reserve(book_size, max_size)
    }

    pub fn index_byte(&mut self, delim: u8, skip: usize) -> Option<usize> {
        self.reader.index_byte(delim, skip)
    }

    pub fn io_slices(&mut self, max: usize) -> Vec<IoSlice<'_>> {
        self.reader.io_slices(max)
    }
}

impl Reader for LinkBuffer {
    type Error = BufferError;

    fn next(&mut self, n: usize) -> Result<Bytes> {
        self.reader.next(n)
    }

    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.reader.peek(n)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.reader.skip(n)
    }

    fn read_until(&mut self, delim: u8) -> Result<Bytes> {
        self.reader.read_until(delim)
    }

    fn read_copy(&mut self, n: usize) -> Result<Vec<u8>> {
        self.reader.read_copy(n)
    }

    fn slice(&mut self, n: usize) -> Result<LinkReader> {
        self.reader.slice(n)
    }

    fn release(&mut self) {
        self.reader.release();
    }

    fn len(&self) -> usize {
        self.reader.len()
    }
}

impl Writer for LinkBuffer {
    type Error = BufferError;

    fn malloc(&mut self, n: usize) -> Result<&mut [u8]> {
        self.writer.malloc(n)
    }

    fn malloc_ack(&mut self, n: usize) -> Result<()> {
        self.writer.malloc_ack(n)
    }

    fn write_binary(&mut self, data: Bytes) -> Result<usize> {
        self.writer.write_binary(data)
    }

    fn write_slice(&mut self, data: &[u8]) -> Result<usize> {
        self.writer.write_slice(data)
    }

    fn write_direct(&mut self, extra: Bytes, remaining: usize) -> Result<()> {
        self.writer.write_direct(extra, remaining)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    fn reserved_len(&self) -> usize {
        self.writer.reserved_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_buffer() -> LinkBuffer {
        LinkBuffer::with_pool(BufferConfig::with_segment_size(16), SegmentPool::new())
    }

    #[test]
    fn reserved_bytes_are_invisible_until_flush() {
        let mut buffer = small_buffer();
        buffer.malloc(4).expect("malloc").copy_from_slice(b"abcd");
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.reserved_len(), 4);
        buffer.flush().expect("flush");
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.reserved_len(), 0);
    }

    #[test]
    fn malloc_ack_rolls_back_across_segments() {
        let mut buffer = small_buffer();
        buffer.malloc(12).expect("malloc").fill(b'a');
        buffer.malloc(12).expect("malloc").fill(b'b');
        buffer.malloc_ack(14).expect("ack");
        buffer.flush().expect("flush");
        let out = buffer.next(14).expect("next");
        assert_eq!(&out[..12], &[b'a'; 12]);
        assert_eq!(&out[12..], b"bb");
        assert!(buffer.is_empty());
    }

    #[test]
    fn book_ack_commits_only_acknowledged_bytes() {
        let mut buffer = small_buffer();
        let booked = buffer.book(8, 64);
        assert_eq!(booked.len(), 8);
        booked[..3].copy_from_slice(b"xyz");
        assert_eq!(buffer.book_ack(3).expect("ack"), 3);
        assert_eq!(buffer.next(3).expect("next").as_ref(), b"xyz");
        assert!(matches!(
            buffer.book_ack(1),
            Err(BufferError::ExceedsReserved { .. })
        ));
    }

    #[test]
    fn dropped_reservation_is_rolled_back() {
        let mut buffer = small_buffer();
        {
            let mut reservation = buffer.reserve(8, 64);
            reservation.as_mut_slice().fill(1);
        }
        assert_eq!(buffer.reserved_len(), 0);
        let mut reservation = buffer.reserve(8, 64);
        reservation.as_mut_slice()[..2].copy_from_slice(&[5, 6]);
        assert_eq!(reservation.commit(2).expect("commit"), 2);
        assert_eq!(buffer.read_copy(2).expect("read"), vec![5, 6]);
    }

    #[test]
    fn small_binary_is_copied_large_binary_is_shared() {
        let config = BufferConfig {
            segment_size: 16,
            nocopy_threshold: 8,
            max_tail_capacity: 64,
        };
        let mut buffer = LinkBuffer::with_pool(config, SegmentPool::new());
        let large = Bytes::from(vec![9u8; 32]);
        let large_ptr = large.as_ptr();
        buffer.write_binary(Bytes::from_static(b"tiny")).expect("write");
        buffer.write_binary(large).expect("write");
        buffer.flush().expect("flush");

        assert_eq!(buffer.next(4).expect("next").as_ref(), b"tiny");
        let shared = buffer.next(32).expect("next");
        assert_eq!(shared.as_ptr(), large_ptr);
    }

    #[test]
    fn index_byte_resumes_from_skip() {
        let mut buffer = small_buffer();
        buffer.write_slice(b"ab\ncd\n").expect("write");
        buffer.flush().expect("flush");
        assert_eq!(buffer.index_byte(b'\n', 0), Some(2));
        assert_eq!(buffer.index_byte(b'\n', 3), Some(5));
        assert_eq!(buffer.index_byte(b'\n', 6), None);
    }

    #[test]
    fn io_slices_cover_every_committed_segment() {
        let mut buffer = small_buffer();
        buffer.write_slice(&[1u8; 40]).expect("write");
        buffer.flush().expect("flush");
        let total: usize = buffer.io_slices(64).iter().map(|slice| slice.len()).sum();
        assert_eq!(total, 40);
        assert_eq!(buffer.io_slices(1).len(), 1);
    }
}
