//! 连接的原子状态寄存器。
//!
//! 三组状态彼此独立，各自以 compare-and-swap 推进：
//! - [`StateCell`]：生命周期 `Pending → Connected → Disconnected`；
//! - [`CloseFlag`]：关闭竞争的胜者（应用或轮询线程）；
//! - [`ProcessFlag`]：请求处理的独占标记，外加 `finish` 之后的终态。
//
// 启用 `--cfg loom` 时切换到 Loom 的原子类型，让模型检查覆盖处理标记的全部交错。
#[cfg(not(loom))]
use std::sync::atomic::{AtomicU8, Ordering, fence};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU8, Ordering, fence};

/// 连接生命周期。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// 已创建，`on_connect` 尚未完成。
    Pending,
    Connected,
    /// 终态。
    Disconnected,
}

impl ConnState {
    const fn encode(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    const fn decode(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnState::Pending.encode()))
    }

    pub(crate) fn get(&self) -> ConnState {
        ConnState::decode(self.0.load(Ordering::Acquire))
    }

    /// `from → to` 成功时返回 `true`。
    pub(crate) fn change(&self, from: ConnState, to: ConnState) -> bool {
        self.0
            .compare_exchange(
                from.encode(),
                to.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// 关闭发起方。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CloseBy {
    None,
    User,
    Poller,
}

impl CloseBy {
    const fn encode(self) -> u8 {
        match self {
            Self::None => 0,
            Self::User => 1,
            Self::Poller => 2,
        }
    }

    const fn decode(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::User,
            _ => Self::Poller,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CloseFlag(AtomicU8);

impl CloseFlag {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(CloseBy::None.encode()))
    }

    pub(crate) fn get(&self) -> CloseBy {
        CloseBy::decode(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.get() != CloseBy::None
    }

    /// 只有第一个声明者成功。
    pub(crate) fn claim(&self, by: CloseBy) -> bool {
        self.0
            .compare_exchange(
                CloseBy::None.encode(),
                by.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 覆盖为应用关闭：对端先关闭时，应用的 `close` 仍要让处理循环尽快退出。
    pub(crate) fn force(&self, by: CloseBy) {
        self.0.store(by.encode(), Ordering::Release);
    }
}

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;
const FINISHED: u8 = 2;

/// 请求处理的独占标记。
///
/// # 逻辑（How）
/// 生产者（轮询线程）先发布数据再 `try_acquire`，处理者先 `release` 再复查数据。
/// 两侧在“写自己的变量”与“读对方的变量”之间各有一道 `SeqCst` 屏障，
/// 因此不会出现双方都看到旧值的交错：要么生产者抢到标记，要么处理者复查时看到新数据。
///
/// # 契约（What）
/// - 同一时刻至多一个持有者；
/// - `finish` 之后 `try_acquire` 永远失败。
#[derive(Debug)]
pub(crate) struct ProcessFlag(AtomicU8);

impl ProcessFlag {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    pub(crate) fn try_acquire(&self) -> bool {
        fence(Ordering::SeqCst);
        self.0
            .compare_exchange(IDLE, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        let _ = self
            .0
            .compare_exchange(PROCESSING, IDLE, Ordering::AcqRel, Ordering::Acquire);
        fence(Ordering::SeqCst);
    }

    /// 由持有者调用，进入终态。
    pub(crate) fn finish(&self) {
        self.0.store(FINISHED, Ordering::Release);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.load(Ordering::Acquire) == FINISHED
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_moves_forward() {
        let state = StateCell::new();
        assert_eq!(state.get(), ConnState::Pending);
        assert!(state.change(ConnState::Pending, ConnState::Connected));
        assert!(!state.change(ConnState::Pending, ConnState::Connected));
        assert!(state.change(ConnState::Connected, ConnState::Disconnected));
        assert_eq!(state.get(), ConnState::Disconnected);
    }

    #[test]
    fn first_closer_wins() {
        let flag = CloseFlag::new();
        assert!(flag.claim(CloseBy::Poller));
        assert!(!flag.claim(CloseBy::User));
        assert_eq!(flag.get(), CloseBy::Poller);
        flag.force(CloseBy::User);
        assert_eq!(flag.get(), CloseBy::User);
    }

    #[test]
    fn process_flag_is_exclusive_until_finished() {
        let flag = ProcessFlag::new();
        assert!(flag.try_acquire());
        assert!(!flag.try_acquire());
        flag.release();
        assert!(flag.try_acquire());
        flag.finish();
        flag.release();
        assert!(flag.is_finished());
        assert!(!flag.try_acquire());
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use loom::sync::Arc;
    use loom::sync::atomic::AtomicUsize;
    use loom::thread;

    use super::*;

    /// 处理者的退出复查：释放标记后若仍有未处理数据，重新抢标记继续处理。
    fn drain(pending: &AtomicUsize, consumed: &AtomicUsize, flag: &ProcessFlag) {
        loop {
            let batch = pending.swap(0, Ordering::AcqRel);
            consumed.fetch_add(batch, Ordering::AcqRel);
            flag.release();
            if pending.load(Ordering::Acquire) == 0 || !flag.try_acquire() {
                return;
            }
        }
    }

    /// 两个生产者各发布一次数据并尝试接管处理；无论如何交错，所有数据都必须被处理。
    #[test]
    fn double_check_never_strands_data() {
        loom::model(|| {
            let pending = Arc::new(AtomicUsize::new(0));
            let consumed = Arc::new(AtomicUsize::new(0));
            let flag = Arc::new(ProcessFlag::new());

            let producers: Vec<_> = (0..2)
                .map(|_| {
                    let pending = Arc::clone(&pending);
                    let consumed = Arc::clone(&consumed);
                    let flag = Arc::clone(&flag);
                    thread::spawn(move || {
                        pending.fetch_add(1, Ordering::AcqRel);
                        if flag.try_acquire() {
                            drain(&pending, &consumed, &flag);
                        }
                    })
                })
                .collect();
            for producer in producers {
                producer.join().expect("生产者不应 panic");
            }
            assert_eq!(consumed.load(Ordering::Acquire), 2);
        });
    }
}
