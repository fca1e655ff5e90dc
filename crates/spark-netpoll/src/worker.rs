use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::config::NetpollConfig;
use crate::error::panic_message;

/// 交给执行器运行的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 请求处理任务的执行器。
///
/// 连接的请求处理循环通过执行器离开轮询线程；默认使用 [`WorkerPool`]，
/// 也可以注入自定义实现（例如把任务投递到业务自己的线程池）。
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Task);
}

enum Message {
    Run(Task),
    Stop,
}

/// 弹性工作线程池。
///
/// # 逻辑（How）
/// - 任务经由无界 `crossbeam_channel` 投递，所有工作线程共享同一接收端；
/// - 投递时若没有空闲线程且线程数未达上限，就地新建一个工作线程；
/// - 超出常驻数的线程空闲 `keep_alive` 后退出；退出前若队列非空则继续工作。
///
/// # 契约（What）
/// - 任务中的 panic 被捕获并记录，不会杀死工作线程；
/// - `shutdown` 之后投递的任务在调用线程上同步执行。
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    min: usize,
    max: usize,
    keep_alive: Duration,
    threads: AtomicUsize,
    idle: AtomicUsize,
    spawned: AtomicUsize,
    closed: AtomicBool,
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("idle", &self.idle())
            .field("queued", &self.inner.receiver.len())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(min: usize, max: usize, keep_alive: Duration) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let max = max.max(1);
        Self {
            inner: Arc::new(PoolInner {
                sender,
                receiver,
                min: min.min(max),
                max,
                keep_alive,
                threads: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &NetpollConfig) -> Self {
        Self::new(
            config.min_workers,
            config.max_workers,
            config.worker_keep_alive(),
        )
    }

    /// 进程级默认线程池，未显式指定执行器的连接使用它。
    pub fn global() -> WorkerPool {
        static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();
        GLOBAL
            .get_or_init(|| WorkerPool::from_config(&NetpollConfig::default()))
            .clone()
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(job));
    }

    pub fn threads(&self) -> usize {
        self.inner.threads.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.inner.idle.load(Ordering::Acquire)
    }

    /// 通知全部工作线程在处理完已排队任务后退出。
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for _ in 0..self.threads() {
            if self.inner.sender.send(Message::Stop).is_err() {
                break;
            }
        }
        debug!("worker pool shutting down");
    }

    fn submit(&self, task: Task) {
        if self.inner.closed.load(Ordering::Acquire) {
            run_guarded(task);
            return;
        }
        if let Err(rejected) = self.inner.sender.send(Message::Run(task)) {
            if let Message::Run(task) = rejected.into_inner() {
                run_guarded(task);
            }
            return;
        }
        if self.idle() == 0 {
            self.grow();
        }
    }

    fn grow(&self) {
        let inner = &self.inner;
        let mut current = inner.threads.load(Ordering::Acquire);
        loop {
            if current >= inner.max {
                return;
            }
            match inner.threads.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let seq = inner.spawned.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("spark-netpoll-worker-{seq}"))
            .spawn(move || worker.work());
        if let Err(error) = spawned {
            inner.threads.fetch_sub(1, Ordering::AcqRel);
            warn!(%error, "failed to spawn worker thread");
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        self.submit(task);
    }
}

impl PoolInner {
    fn work(self: Arc<Self>) {
        loop {
            self.idle.fetch_add(1, Ordering::AcqRel);
            let message = if self.threads.load(Ordering::Acquire) > self.min {
                match self.receiver.recv_timeout(self.keep_alive) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(Message::Stop),
                }
            } else {
                Some(self.receiver.recv().unwrap_or(Message::Stop))
            };
            self.idle.fetch_sub(1, Ordering::AcqRel);

            match message {
                Some(Message::Run(task)) => run_guarded(task),
                Some(Message::Stop) => {
                    self.threads.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
                None => {
                    if self.receiver.is_empty() && self.try_retire() {
                        return;
                    }
                }
            }
        }
    }

    fn try_retire(&self) -> bool {
        let mut current = self.threads.load(Ordering::Acquire);
        while current > self.min {
            match self.threads.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

fn run_guarded(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(panic = %panic_message(payload.as_ref()), "worker task panicked");
    }
}
