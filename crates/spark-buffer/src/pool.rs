use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};

use bytes::BytesMut;
use spin::Mutex;

/// 最小尺寸级别：16 字节。
const MIN_CLASS_SHIFT: u32 = 4;
/// 最大尺寸级别：1 MiB；更大的申请直接走堆分配，回收时丢弃。
const MAX_CLASS_SHIFT: u32 = 20;
const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;
/// 每个尺寸级别最多缓存的段数。
const MAX_CACHED_PER_CLASS: usize = 64;

/// `SegmentPool` 按 2 的幂分级缓存段内存，为链式缓冲的写端提供分配来源。
///
/// # 模块角色（Why）
/// - 链式缓冲以段为单位申请内存，读写两端频繁地创建与丢弃段；
///   池化后可复用已释放的分配，避免每个段都走一次堆分配；
/// - 多个缓冲（例如同一进程内的全部连接）共享同一个池，峰值过后由 [`SegmentPool::shrink_to_fit`] 归还内存。
///
/// # 核心机制（How）
/// - 每个尺寸级别维护一条 `spin::Mutex<Vec<BytesMut>>` 自由链表；
/// - 归还的 `BytesMut` 可能仍与读端持有的 `Bytes` 视图共享同一分配，
///   租借时通过 `BytesMut::try_reclaim` 判断视图是否已全部释放：成功即复用整块容量，
///   失败记为 `pinned` 并保留在链表中等待下次尝试；
/// - `PoolMetrics` 以原子计数记录分配、复用、回收与丢弃次数，供 [`SegmentPool::stats`] 生成快照。
///
/// # 契约说明（What）
/// - `Clone` 仅复制句柄，所有克隆共享同一组自由链表与统计；
/// - `acquire(min)` 返回的缓冲满足 `capacity() >= min` 且 `len() == 0`。
///
/// # 设计权衡（Trade-offs）
/// - 临界区只涉及 `Vec` 的 push/pop 与少量 `try_reclaim`，选用自旋锁而非阻塞锁；
/// - 被视图钉住的段不会被强制回收，内存只在视图全部释放后才能复用。
#[derive(Clone)]
pub struct SegmentPool {
    inner: Arc<PoolInner>,
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self {
            inner: Arc::new(PoolInner::new()),
        }
    }
}

impl core::fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// 段池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 新分配的段数（包括超出最大级别的直接分配）。
    pub allocated: u64,
    /// 从自由链表复用的段数。
    pub reused: u64,
    /// 归还并进入自由链表的段数。
    pub recycled: u64,
    /// 因仍被视图引用而暂不可复用的尝试次数。
    pub pinned: u64,
    /// 归还时被丢弃的段数（尺寸不在级别内或链表已满）。
    pub discarded: u64,
    /// 当前缓存的段数。
    pub cached: usize,
    /// 当前缓存段的名义容量之和。
    pub cached_bytes: usize,
}

impl SegmentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享池，未显式注入池的缓冲默认使用它。
    pub fn global() -> SegmentPool {
        static GLOBAL: OnceLock<SegmentPool> = OnceLock::new();
        GLOBAL.get_or_init(SegmentPool::new).clone()
    }

    /// 租借至少 `min_capacity` 字节的空段，返回缓冲及其名义分配尺寸。
    ///
    /// 名义尺寸需在归还时原样交回，池据此定位尺寸级别。
    pub(crate) fn acquire(&self, min_capacity: usize) -> (BytesMut, usize) {
        let min_capacity = min_capacity.max(1);
        match class_index(min_capacity) {
            Some(index) => {
                let size = class_size(index);
                if let Some(buf) = self.inner.take_reclaimable(index, size) {
                    self.inner.metrics.reused.fetch_add(1, Ordering::Relaxed);
                    return (buf, size);
                }
                self.inner.metrics.allocated.fetch_add(1, Ordering::Relaxed);
                (BytesMut::with_capacity(size), size)
            }
            None => {
                self.inner.metrics.allocated.fetch_add(1, Ordering::Relaxed);
                (BytesMut::with_capacity(min_capacity), min_capacity)
            }
        }
    }

    /// 归还段。`buf` 中残留的字节会被清空；读端持有的视图不受影响。
    pub(crate) fn recycle(&self, mut buf: BytesMut, allocation: usize) {
        buf.clear();
        let index = match class_index(allocation) {
            Some(index) if class_size(index) == allocation => index,
            _ => {
                self.inner.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let mut list = self.inner.classes[index].lock();
        if list.len() >= MAX_CACHED_PER_CLASS {
            drop(list);
            self.inner.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        list.push(buf);
        self.inner.metrics.recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        let metrics = &self.inner.metrics;
        let mut cached = 0;
        let mut cached_bytes = 0;
        for (index, class) in self.inner.classes.iter().enumerate() {
            let len = class.lock().len();
            cached += len;
            cached_bytes += len * class_size(index);
        }
        PoolStats {
            allocated: metrics.allocated.load(Ordering::Relaxed),
            reused: metrics.reused.load(Ordering::Relaxed),
            recycled: metrics.recycled.load(Ordering::Relaxed),
            pinned: metrics.pinned.load(Ordering::Relaxed),
            discarded: metrics.discarded.load(Ordering::Relaxed),
            cached,
            cached_bytes,
        }
    }

    /// 清空全部自由链表，返回释放的名义字节数。
    pub fn shrink_to_fit(&self) -> usize {
        let mut released = 0;
        for (index, class) in self.inner.classes.iter().enumerate() {
            let mut list = class.lock();
            released += list.len() * class_size(index);
            list.clear();
        }
        released
    }
}

struct PoolInner {
    classes: Vec<Mutex<Vec<BytesMut>>>,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            classes: (0..CLASS_COUNT).map(|_| Mutex::new(Vec::new())).collect(),
            metrics: PoolMetrics::default(),
        }
    }

    /// 从后向前寻找视图已全部释放的段。
    fn take_reclaimable(&self, index: usize, size: usize) -> Option<BytesMut> {
        let mut list = self.classes[index].lock();
        let mut pinned = 0;
        let mut found = None;
        for slot in (0..list.len()).rev() {
            if list[slot].try_reclaim(size) {
                found = Some(list.swap_remove(slot));
                break;
            }
            pinned += 1;
        }
        drop(list);
        if pinned > 0 {
            self.metrics.pinned.fetch_add(pinned, Ordering::Relaxed);
        }
        found
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
    pinned: AtomicU64,
    discarded: AtomicU64,
}

fn class_index(size: usize) -> Option<usize> {
    let shift = size.checked_next_power_of_two()?.trailing_zeros();
    if shift > MAX_CLASS_SHIFT {
        return None;
    }
    Some(shift.saturating_sub(MIN_CLASS_SHIFT) as usize)
}

fn class_size(index: usize) -> usize {
    1 << (index as u32 + MIN_CLASS_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_round_up_to_power_of_two() {
        assert_eq!(class_index(1), Some(0));
        assert_eq!(class_index(16), Some(0));
        assert_eq!(class_index(17).map(class_size), Some(32));
        assert_eq!(class_index(1025).map(class_size), Some(2048));
        assert_eq!(class_index((1 << MAX_CLASS_SHIFT) + 1), None);
    }

    #[test]
    fn released_segment_is_reused() {
        let pool = SegmentPool::new();
        let (buf, size) = pool.acquire(3000);
        assert_eq!(size, 4096);
        assert!(buf.capacity() >= 3000);
        pool.recycle(buf, size);

        let (again, _) = pool.acquire(4096);
        assert!(again.capacity() >= 4096);
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.cached, 0);
    }

    #[test]
    fn segment_pinned_by_view_is_not_reused() {
        let pool = SegmentPool::new();
        let (mut buf, size) = pool.acquire(1024);
        buf.extend_from_slice(&[7u8; 1024]);
        let view = buf.split().freeze();
        pool.recycle(buf, size);

        let (_fresh, _) = pool.acquire(1024);
        let stats = pool.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.pinned, 1);
        assert_eq!(stats.cached, 1);
        assert_eq!(&view[..4], &[7, 7, 7, 7]);

        drop(view);
        let (_reclaimed, _) = pool.acquire(1024);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn oversized_segments_bypass_the_pool() {
        let pool = SegmentPool::new();
        let want = (1 << MAX_CLASS_SHIFT) + 1;
        let (buf, size) = pool.acquire(want);
        assert_eq!(size, want);
        pool.recycle(buf, size);
        let stats = pool.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(pool.shrink_to_fit(), 0);
    }
}
