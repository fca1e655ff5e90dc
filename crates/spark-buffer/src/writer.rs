use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::BufferConfig;
use crate::contract::Writer;
use crate::error::{BufferError, Result};
use crate::pool::SegmentPool;
use crate::segment::{Segment, Shared, Tail};

/// 链式缓冲的写端。
///
/// # 设计概要（How）
/// - 预留字节分布在 `pending` 与 `tail` 两处：`tail` 是当前写段，`malloc` 在其剩余容量内追加；
///   容量不足、挂接外部内存或插入头部时，`tail` 中已预留的部分被切出并移入 `pending`；
/// - `flush` 将 `pending` 与 `tail` 的已预留部分依次冻结为 `Bytes` 提交给读端，
///   `tail` 保留剩余容量继续承接后续写入；
/// - 提交后若写段的名义容量超过 `max_tail_capacity`，写端换用新段，
///   让大块内存在读端消费完毕后尽快回到池中。
///
/// # 契约（What）
/// - 单生产者：`&mut self` 保证同一时刻只有一个调用方预留与提交；
/// - `malloc` 返回的切片在下一次写端调用前有效，且不会被读端观察到，直到 `flush`。
pub struct LinkWriter {
    shared: Arc<Shared>,
    pool: SegmentPool,
    config: BufferConfig,
    pending: VecDeque<Segment>,
    tail: Option<Tail>,
    reserved: usize,
    booked: usize,
}

impl core::fmt::Debug for LinkWriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkWriter")
            .field("reserved", &self.reserved)
            .field("pending", &self.pending.len())
            .field("readable", &self.shared.readable())
            .finish()
    }
}

impl LinkWriter {
    pub(crate) fn new(shared: Arc<Shared>, pool: SegmentPool, config: BufferConfig) -> Self {
        Self {
            shared,
            pool,
            config,
            pending: VecDeque::new(),
            tail: None,
            reserved: 0,
            booked: 0,
        }
    }

    /// 对端可读的已提交字节数。
    pub fn readable_len(&self) -> usize {
        self.shared.readable()
    }

    /// 为 socket 读预订一段可写空间。
    ///
    /// # 逻辑（How）
    /// - 当前写段仍有剩余容量时，直接在其中预订 `min(剩余, book_size)` 字节；
    /// - 否则向池租借 `max_size` 大小的新段，再按 `book_size` 截取；
    /// - 返回的区域须以 [`LinkWriter::book_ack`] 确认实际写入量。
    pub fn book(&mut self, book_size: usize, max_size: usize) -> &mut [u8] {
        if book_size == 0 {
            return &mut [];
        }
        let has_room = self.tail.as_ref().is_some_and(|tail| tail.spare() > 0);
        if !has_room {
            self.seal_tail();
        }
        let pool = &self.pool;
        let tail = self.tail.get_or_insert_with(|| {
            let (buf, allocation) = pool.acquire(max_size.max(1));
            Tail { buf, allocation }
        });
        let len = tail.spare().min(book_size);
        let start = tail.buf.len();
        tail.buf.resize(start + len, 0);
        self.reserved += len;
        self.booked = len;
        match self.tail.as_mut() {
            Some(tail) => &mut tail.buf[start..],
            None => &mut [],
        }
    }

    /// 确认预订区的前 `n` 字节并立即提交，返回提交后的可读长度。
    pub fn book_ack(&mut self, n: usize) -> Result<usize> {
        if n > self.booked {
            return Err(BufferError::ExceedsReserved {
                requested: n,
                reserved: self.booked,
            });
        }
        self.rollback_booked(self.booked - n);
        self.commit();
        Ok(self.shared.readable())
    }

    /// 以 RAII 形式预订空间：[`Reservation::commit`] 确认，未确认即丢弃时回滚。
    pub fn reserve(&mut self, book_size: usize, max_size: usize) -> Reservation<'_> {
        let len = self.book(book_size, max_size).len();
        Reservation {
            writer: self,
            len,
            settled: false,
        }
    }

    /// 丢弃全部预留字节，写段归还到池。
    pub fn clear(&mut self) {
        self.pending.clear();
        self.reserved = 0;
        self.booked = 0;
        if let Some(tail) = self.tail.take() {
            self.pool.recycle(tail.buf, tail.allocation);
        }
    }

    fn rollback_booked(&mut self, surplus: usize) {
        self.booked = 0;
        if surplus == 0 {
            return;
        }
        if let Some(tail) = self.tail.as_mut() {
            let len = tail.buf.len();
            tail.buf.truncate(len - surplus);
        }
        self.reserved -= surplus;
    }

    /// 确保写段至少还有 `n` 字节剩余容量。
    fn tail_with_room(&mut self, n: usize) -> &mut Tail {
        let fits = self.tail.as_ref().is_some_and(|tail| tail.spare() >= n);
        if !fits {
            self.seal_tail();
        }
        let pool = &self.pool;
        let size = n.max(self.config.segment_size);
        self.tail.get_or_insert_with(|| {
            let (buf, allocation) = pool.acquire(size);
            Tail { buf, allocation }
        })
    }

    /// 把写段中已预留的部分移入 `pending`，写段本身归还到池。
    fn seal_tail(&mut self) {
        if let Some(mut tail) = self.tail.take() {
            if !tail.buf.is_empty() {
                self.pending.push_back(Segment::Owned(tail.buf.split()));
            }
            self.pool.recycle(tail.buf, tail.allocation);
        }
    }

    fn commit(&mut self) {
        self.booked = 0;
        if self.reserved > 0 {
            let mut batch: Vec<Bytes> = self.pending.drain(..).map(Segment::freeze).collect();
            if let Some(tail) = self.tail.as_mut() {
                if !tail.buf.is_empty() {
                    batch.push(tail.buf.split().freeze());
                }
            }
            self.shared.publish(batch, self.reserved);
            self.reserved = 0;
        }
        let cut = self.tail.as_ref().is_some_and(|tail| {
            tail.allocation > self.config.max_tail_capacity || tail.spare() == 0
        });
        if cut {
            self.seal_tail();
        }
    }
}

impl Writer for LinkWriter {
    type Error = BufferError;

    fn malloc(&mut self, n: usize) -> Result<&mut [u8]> {
        if n == 0 {
            return Ok(&mut []);
        }
        self.booked = 0;
        self.reserved += n;
        let tail = self.tail_with_room(n);
        let start = tail.buf.len();
        tail.buf.resize(start + n, 0);
        Ok(&mut tail.buf[start..])
    }

    fn malloc_ack(&mut self, n: usize) -> Result<()> {
        if n > self.reserved {
            return Err(BufferError::ExceedsReserved {
                requested: n,
                reserved: self.reserved,
            });
        }
        let mut keep = n;
        let mut cut_at = None;
        for (index, segment) in self.pending.iter_mut().enumerate() {
            if keep >= segment.len() {
                keep -= segment.len();
                continue;
            }
            segment.truncate(keep);
            cut_at = Some(if keep > 0 { index + 1 } else { index });
            keep = 0;
            break;
        }
        match cut_at {
            Some(index) => {
                self.pending.truncate(index);
                if let Some(tail) = self.tail.as_mut() {
                    tail.buf.clear();
                }
            }
            None => {
                if let Some(tail) = self.tail.as_mut() {
                    tail.buf.truncate(keep);
                }
            }
        }
        self.reserved = n;
        self.booked = 0;
        Ok(())
    }

    fn write_binary(&mut self, data: Bytes) -> Result<usize> {
        let n = data.len();
        if n == 0 {
            return Ok(0);
        }
        if n > self.config.nocopy_threshold {
            self.booked = 0;
            self.seal_tail();
            self.pending.push_back(Segment::Shared(data));
            self.reserved += n;
            return Ok(n);
        }
        self.malloc(n)?.copy_from_slice(&data);
        Ok(n)
    }

    fn write_slice(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.malloc(data.len())?.copy_from_slice(data);
        Ok(data.len())
    }

    fn write_direct(&mut self, extra: Bytes, remaining: usize) -> Result<()> {
        if extra.is_empty() {
            return Ok(());
        }
        if remaining > self.reserved {
            return Err(BufferError::ExceedsReserved {
                requested: remaining,
                reserved: self.reserved,
            });
        }
        self.booked = 0;
        let added = extra.len();
        let mut offset = self.reserved - remaining;

        let mut target = None;
        for (index, segment) in self.pending.iter().enumerate() {
            if offset <= segment.len() {
                target = Some(index);
                break;
            }
            offset -= segment.len();
        }

        match target {
            Some(index) => {
                let rest = self.pending[index].split_off(offset);
                let mut at = index + 1;
                if self.pending[index].is_empty() {
                    self.pending.remove(index);
                    at = index;
                }
                self.pending.insert(at, Segment::Shared(extra));
                if !rest.is_empty() {
                    self.pending.insert(at + 1, rest);
                }
            }
            None => {
                if let Some(tail) = self.tail.as_mut() {
                    let head = tail.buf.split_to(offset);
                    if !head.is_empty() {
                        self.pending.push_back(Segment::Owned(head));
                    }
                }
                self.pending.push_back(Segment::Shared(extra));
            }
        }
        self.reserved += added;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.commit();
        Ok(())
    }

    fn reserved_len(&self) -> usize {
        self.reserved
    }
}

impl Drop for LinkWriter {
    fn drop(&mut self) {
        if let Some(tail) = self.tail.take() {
            self.pool.recycle(tail.buf, tail.allocation);
        }
    }
}

/// [`LinkWriter::reserve`] 返回的预订区。
///
/// 通过 [`Reservation::commit`] 确认实际写入的字节数并提交；
/// 未提交即被丢弃时整段预订回滚，读端看不到任何字节。
pub struct Reservation<'a> {
    writer: &'a mut LinkWriter,
    len: usize,
    settled: bool,
}

impl Reservation<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.writer.tail.as_mut() {
            Some(tail) => {
                let end = tail.buf.len();
                &mut tail.buf[end - self.len..]
            }
            None => &mut [],
        }
    }

    /// 确认前 `n` 字节并提交，返回提交后的可读长度。
    pub fn commit(mut self, n: usize) -> Result<usize> {
        self.settled = true;
        self.writer.book_ack(n)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.writer.rollback_booked(self.len);
        }
    }
}
