use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use slab::Slab;
use tracing::{debug, error};

use super::operator::OperatorKind;
use super::{AcceptHandler, FdOperator, Interest, IoHandler, Multiplexer, Readiness};
use crate::error::{NetpollError, REGISTER};
use crate::socket::Socket;

const EVENT_BATCH: usize = 1024;

/// 单个轮询线程：一个多路复用器加一张 fd 注册表。
///
/// # 逻辑（How）
/// - `run` 阻塞在 `Multiplexer::wait` 上，取回一批就绪事件后按令牌查表、逐个分发；
/// - 注册分两步：先插入注册表拿到令牌（[`PollLoop::insert_stream`]），再由 [`FdOperator::arm`]
///   向多路复用器登记，保证任何事件到达时注册表中已有对应句柄；
/// - 令牌高半部分为代数、低半部分为槽位，分发时校验完整令牌，丢弃已注销 fd 的残留事件。
///
/// # 契约（What）
/// - 注册表持有句柄的强引用，句柄经由 `detach` 移出；
/// - `close` 之后循环在下一次唤醒时退出，剩余的连接按对端关闭处理并各自完成清理。
pub struct PollLoop {
    id: usize,
    mux: Arc<dyn Multiplexer>,
    operators: Mutex<Slab<Arc<FdOperator>>>,
    next_generation: AtomicU32,
    closed: AtomicBool,
}

impl core::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PollLoop")
            .field("id", &self.id)
            .field("registered", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// 令牌的低半部分是槽位，高半部分是代数，各占 `usize` 位宽的一半。
const KEY_BITS: u32 = usize::BITS / 2;
const KEY_MASK: usize = (1usize << KEY_BITS) - 1;
/// 槽位上限（不含）。全 1 代数配上最高的两个槽位会落到唤醒器的令牌上。
const MAX_KEY: usize = KEY_MASK - 1;

fn encode_token(key: usize, generation: u32) -> usize {
    let generation = generation as usize & KEY_MASK;
    (generation << KEY_BITS) | (key & KEY_MASK)
}

fn token_key(token: usize) -> usize {
    token & KEY_MASK
}

impl PollLoop {
    pub fn new(id: usize, mux: Arc<dyn Multiplexer>) -> Arc<Self> {
        Arc::new(Self {
            id,
            mux,
            operators: Mutex::new(Slab::new()),
            next_generation: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// 当前注册的 fd 数量。
    pub fn len(&self) -> usize {
        self.operators.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mux(&self) -> &dyn Multiplexer {
        self.mux.as_ref()
    }

    pub(crate) fn insert_stream(
        self: &Arc<Self>,
        socket: Arc<dyn Socket>,
        handler: Arc<dyn IoHandler>,
    ) -> Result<Arc<FdOperator>, NetpollError> {
        let fd = socket.fd();
        self.insert(fd, OperatorKind::Stream { socket, handler })
    }

    pub(crate) fn insert_listener(
        self: &Arc<Self>,
        fd: RawFd,
        handler: Arc<dyn AcceptHandler>,
    ) -> Result<Arc<FdOperator>, NetpollError> {
        self.insert(fd, OperatorKind::Listener(handler))
    }

    fn insert(self: &Arc<Self>, fd: RawFd, kind: OperatorKind) -> Result<Arc<FdOperator>, NetpollError> {
        let mut operators = self.operators.lock();
        // 退出中的循环在同一把锁下清空注册表。
        if self.is_closed() {
            return Err(NetpollError::InvalidState("poller has shut down"));
        }
        let entry = operators.vacant_entry();
        if entry.key() >= MAX_KEY {
            return Err(NetpollError::InvalidState("poller registry is full"));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = encode_token(entry.key(), generation);
        let operator = Arc::new(FdOperator::new(fd, token, kind, Arc::downgrade(self)));
        entry.insert(Arc::clone(&operator));
        Ok(operator)
    }

    pub(crate) fn arm(&self, operator: &FdOperator, interest: Interest) -> Result<(), NetpollError> {
        self.mux
            .register(operator.fd(), operator.token(), interest)
            .map_err(|source| NetpollError::registration(REGISTER, source))
    }

    /// 把句柄移出注册表；令牌不匹配（槽位已被复用）时什么也不做。
    pub(crate) fn forget(&self, operator: &FdOperator) {
        let mut operators = self.operators.lock();
        let key = token_key(operator.token());
        let matches = operators
            .get(key)
            .is_some_and(|current| current.token() == operator.token());
        if matches {
            operators.remove(key);
        }
    }

    /// 请求轮询线程退出。
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(error) = self.mux.wake() {
            error!(poller = self.id, %error, "failed to wake poller for shutdown");
        }
    }

    /// 轮询线程主循环。
    pub fn run(self: Arc<Self>) {
        debug!(poller = self.id, "poll loop started");
        let mut ready: Vec<Readiness> = Vec::with_capacity(EVENT_BATCH);
        while !self.is_closed() {
            ready.clear();
            if let Err(error) = self.mux.wait(&mut ready, None) {
                error!(poller = self.id, %error, "poll wait failed; poll loop exits");
                break;
            }
            for readiness in &ready {
                let operator = {
                    let operators = self.operators.lock();
                    operators
                        .get(token_key(readiness.token))
                        .filter(|operator| operator.token() == readiness.token)
                        .cloned()
                };
                if let Some(operator) = operator {
                    operator.dispatch(readiness);
                }
            }
        }
        let remaining: Vec<Arc<FdOperator>> = self.operators.lock().drain().collect();
        debug!(
            poller = self.id,
            remaining = remaining.len(),
            "poll loop stopped"
        );
        for operator in remaining {
            operator.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_carry_slot_and_generation() {
        let token = encode_token(5, 3);
        assert_eq!(token_key(token), 5);
        assert_ne!(token, encode_token(5, 4));
    }

    #[test]
    fn tokens_fit_in_usize_and_avoid_the_wake_token() {
        let token = encode_token(MAX_KEY - 1, u32::MAX);
        assert_eq!(token_key(token), MAX_KEY - 1);
        assert_ne!(token, usize::MAX - 1);
        assert_ne!(token, usize::MAX);
        // 代数超出可用位宽时回绕，槽位不受影响。
        assert_eq!(token_key(encode_token(7, u32::MAX)), 7);
    }
}
