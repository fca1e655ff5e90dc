use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::contract::Reader;
use crate::error::{BufferError, Result};
use crate::segment::Shared;

/// 链式缓冲的读端。
///
/// # 设计概要（How）
/// - 已提交的段先进入与写端共享的队列，读端在数据不足时整体搬到本地 `segments`，
///   此后的读操作只访问本地状态，不与写端争锁；
/// - 单段内的 `next` 通过 `Bytes::split_to` 零拷贝交出视图；跨段时才复制；
/// - 跨段 `peek` 把涉及的字节复制到 `peek_cache`，后续更长的 `peek` 在缓存上增量扩展；
///   任何推进读指针的操作都会使缓存失效；
/// - `skip` 跳过的整段暂存在 `exhausted`，直到 `release` 才真正丢弃。
///
/// # 契约（What）
/// - 单消费者：`&mut self` 保证同一时刻只有一个调用方推进读指针；
/// - `len()` 读取共享原子计数，可与写端并发调用；
/// - 由 [`Reader::slice`] 产生的读端没有对应写端，天然只读。
pub struct LinkReader {
    shared: Arc<Shared>,
    segments: VecDeque<Bytes>,
    buffered: usize,
    exhausted: Vec<Bytes>,
    peek_cache: BytesMut,
}

impl core::fmt::Debug for LinkReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkReader")
            .field("len", &self.len())
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl LinkReader {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            segments: VecDeque::new(),
            buffered: 0,
            exhausted: Vec::new(),
            peek_cache: BytesMut::new(),
        }
    }

    /// 以一组现成的段构造独立读端。
    fn detached(segments: VecDeque<Bytes>, len: usize) -> Self {
        let mut reader = Self::new(Arc::new(Shared::with_readable(len)));
        reader.segments = segments;
        reader.buffered = len;
        reader
    }

    /// 返回一个可跨线程读取可读长度的探针。
    pub fn length_probe(&self) -> ReadableLength {
        ReadableLength {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 本地持有的段数，包含尚未搬运的队列时需先调用任意读操作。
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// 从 `skip` 偏移开始查找 `delim`，返回相对读指针的下标。
    ///
    /// 调用方在数据不完整时可以记下已扫描的长度，下一次从该处继续，避免重复扫描。
    pub fn index_byte(&mut self, delim: u8, skip: usize) -> Option<usize> {
        self.pull();
        let mut offset = 0;
        let mut skip = skip;
        for segment in &self.segments {
            let len = segment.len();
            if skip >= len {
                skip -= len;
                offset += len;
                continue;
            }
            if let Some(pos) = segment[skip..].iter().position(|byte| *byte == delim) {
                return Some(offset + skip + pos);
            }
            offset += len;
            skip = 0;
        }
        None
    }

    /// 以分散视图的形式暴露最多 `max` 个段，供 `writev` 一次性发送。
    pub fn io_slices(&mut self, max: usize) -> Vec<IoSlice<'_>> {
        self.pull();
        self.segments
            .iter()
            .take(max)
            .map(|segment| IoSlice::new(segment))
            .collect()
    }

    /// 丢弃全部未读数据与缓存。
    pub fn clear(&mut self) {
        self.pull();
        let dropped = self.buffered;
        self.segments.clear();
        self.buffered = 0;
        self.shared.consume(dropped);
        self.release();
    }

    fn pull(&mut self) {
        self.buffered += self.shared.drain_into(&mut self.segments);
    }

    fn ensure(&mut self, n: usize) -> Result<()> {
        let available = self.len();
        if available < n {
            return Err(BufferError::insufficient(n, available));
        }
        if self.buffered < n {
            self.pull();
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.buffered -= n;
        self.shared.consume(n);
    }

    fn retire_front(&mut self) {
        if let Some(segment) = self.segments.pop_front() {
            self.exhausted.push(segment);
        }
    }

    /// 把读指针处的 `n` 个字节复制进 `out` 并推进读指针。调用前须已 `ensure(n)`。
    fn drain_to<B: BufMut>(&mut self, n: usize, out: &mut B) {
        let mut need = n;
        while need > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let take = front.len().min(need);
            out.put_slice(&front[..take]);
            front.advance(take);
            need -= take;
            if front.is_empty() {
                self.retire_front();
            }
        }
        self.consume(n);
    }

    fn extend_peek_cache(&mut self, n: usize) {
        let mut skip = self.peek_cache.len();
        for segment in &self.segments {
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(n - self.peek_cache.len());
            self.peek_cache.extend_from_slice(&segment[skip..skip + take]);
            skip = 0;
            if self.peek_cache.len() == n {
                break;
            }
        }
    }
}

impl Reader for LinkReader {
    type Error = BufferError;

    fn next(&mut self, n: usize) -> Result<Bytes> {
        if n == 0 {
            return Ok(Bytes::new());
        }
        self.ensure(n)?;
        self.peek_cache.clear();

        let in_front = self.segments.front().is_some_and(|front| front.len() >= n);
        if !in_front {
            let mut out = BytesMut::with_capacity(n);
            self.drain_to(n, &mut out);
            return Ok(out.freeze());
        }
        let mut out = Bytes::new();
        if let Some(front) = self.segments.front_mut() {
            out = front.split_to(n);
            if front.is_empty() {
                self.segments.pop_front();
            }
        }
        self.consume(n);
        Ok(out)
    }

    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        if n == 0 {
            return Ok(&[]);
        }
        self.ensure(n)?;
        let in_front = self.segments.front().is_some_and(|front| front.len() >= n);
        if in_front {
            return Ok(&self.segments[0][..n]);
        }
        if self.peek_cache.len() < n {
            self.extend_peek_cache(n);
        }
        Ok(&self.peek_cache[..n])
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.ensure(n)?;
        self.peek_cache.clear();
        let mut need = n;
        while need > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let take = front.len().min(need);
            front.advance(take);
            need -= take;
            if front.is_empty() {
                self.retire_front();
            }
        }
        self.consume(n);
        Ok(())
    }

    fn read_until(&mut self, delim: u8) -> Result<Bytes> {
        match self.index_byte(delim, 0) {
            Some(index) => self.next(index + 1),
            None => {
                let available = self.len();
                Err(BufferError::insufficient(available + 1, available))
            }
        }
    }

    fn read_copy(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure(n)?;
        self.peek_cache.clear();
        let mut out = Vec::with_capacity(n);
        self.drain_to(n, &mut out);
        Ok(out)
    }

    fn slice(&mut self, n: usize) -> Result<LinkReader> {
        self.ensure(n)?;
        let mut taken = VecDeque::new();
        let mut need = n;
        while need > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            if front.len() > need {
                taken.push_back(front.split_to(need));
                need = 0;
            } else {
                need -= front.len();
                if let Some(segment) = self.segments.pop_front() {
                    taken.push_back(segment);
                }
            }
        }
        self.consume(n);
        self.release();
        Ok(LinkReader::detached(taken, n))
    }

    fn release(&mut self) {
        self.exhausted.clear();
        if self.peek_cache.capacity() > 0 {
            self.peek_cache = BytesMut::new();
        }
    }

    fn len(&self) -> usize {
        self.shared.readable()
    }
}

/// 可读长度探针，可在其它线程观察读端的 `len()`。
#[derive(Clone)]
pub struct ReadableLength {
    shared: Arc<Shared>,
}

impl ReadableLength {
    pub fn get(&self) -> usize {
        self.shared.readable()
    }
}

impl core::fmt::Debug for ReadableLength {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ReadableLength").field(&self.get()).finish()
    }
}
