use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use spin::Mutex;

/// 写端已预留、尚未提交的段。
///
/// 可变与只读以类型区分：池化内存以 `Owned` 持有，可继续截断与拆分；
/// 外部挂接的字节以 `Shared` 持有，写端从不改写其内容。
#[derive(Debug)]
pub(crate) enum Segment {
    Owned(BytesMut),
    Shared(Bytes),
}

impl Segment {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Owned(buf) => buf.len(),
            Self::Shared(bytes) => bytes.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        match self {
            Self::Owned(buf) => buf.truncate(len),
            Self::Shared(bytes) => bytes.truncate(len),
        }
    }

    /// 在 `at` 处一分为二，`self` 保留前半段，返回后半段。两者共享原内存。
    pub(crate) fn split_off(&mut self, at: usize) -> Segment {
        match self {
            Self::Owned(buf) => Self::Owned(buf.split_off(at)),
            Self::Shared(bytes) => Self::Shared(bytes.split_off(at)),
        }
    }

    pub(crate) fn freeze(self) -> Bytes {
        match self {
            Self::Owned(buf) => buf.freeze(),
            Self::Shared(bytes) => bytes,
        }
    }
}

/// 当前写段：在其剩余容量内继续追加预留字节。
pub(crate) struct Tail {
    pub(crate) buf: BytesMut,
    /// 向池租借时的名义尺寸，归还时原样交回。
    pub(crate) allocation: usize,
}

impl Tail {
    pub(crate) fn spare(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }
}

/// 读写两端之间的提交队列。
///
/// 写端在 `publish` 中把冻结后的段追加到队尾并增加可读长度，两步在同一把锁内完成；
/// 读端 `drain_into` 同样持锁搬运，因此读端本地段长度之和永远不超过 `readable`。
pub(crate) struct Shared {
    committed: Mutex<VecDeque<Bytes>>,
    readable: AtomicUsize,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self::with_readable(0)
    }

    /// 构造一个已预先计入 `readable` 字节、但队列为空的共享状态，供切片使用。
    pub(crate) fn with_readable(readable: usize) -> Self {
        Self {
            committed: Mutex::new(VecDeque::new()),
            readable: AtomicUsize::new(readable),
        }
    }

    pub(crate) fn readable(&self) -> usize {
        self.readable.load(Ordering::Acquire)
    }

    /// 追加一批段并返回提交后的可读长度。
    pub(crate) fn publish(&self, segments: impl IntoIterator<Item = Bytes>, len: usize) -> usize {
        let mut queue = self.committed.lock();
        queue.extend(segments.into_iter().filter(|segment| !segment.is_empty()));
        self.readable.fetch_add(len, Ordering::AcqRel) + len
    }

    /// 把队列中全部段搬到读端本地，返回搬运的字节数。
    pub(crate) fn drain_into(&self, local: &mut VecDeque<Bytes>) -> usize {
        let mut queue = self.committed.lock();
        let mut moved = 0;
        for segment in queue.drain(..) {
            moved += segment.len();
            local.push_back(segment);
        }
        moved
    }

    pub(crate) fn consume(&self, n: usize) {
        self.readable.fetch_sub(n, Ordering::AcqRel);
    }
}
