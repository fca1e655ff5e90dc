use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{MioMultiplexer, Multiplexer, PollLoop};
use crate::error::{NetpollError, POLLER};

/// 管理一组轮询线程，新连接按轮转方式分配到各线程。
pub struct PollManager {
    loops: Vec<Arc<PollLoop>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl core::fmt::Debug for PollManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PollManager")
            .field("loops", &self.loops)
            .finish_non_exhaustive()
    }
}

impl PollManager {
    /// 创建 `pollers` 个基于 `mio` 的轮询线程。
    pub fn new(pollers: usize) -> Result<Arc<Self>, NetpollError> {
        let muxes = (0..pollers.max(1))
            .map(|_| MioMultiplexer::new().map(|mux| Arc::new(mux) as Arc<dyn Multiplexer>))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|source| NetpollError::io(POLLER, source))?;
        Self::with_multiplexers(muxes)
    }

    /// 以给定的多路复用器创建轮询线程，每个多路复用器对应一个线程。
    pub fn with_multiplexers(muxes: Vec<Arc<dyn Multiplexer>>) -> Result<Arc<Self>, NetpollError> {
        if muxes.is_empty() {
            return Err(NetpollError::InvalidState("at least one poller is required"));
        }
        let loops: Vec<Arc<PollLoop>> = muxes
            .into_iter()
            .enumerate()
            .map(|(id, mux)| PollLoop::new(id, mux))
            .collect();

        let mut threads = Vec::with_capacity(loops.len());
        for poll in &loops {
            let poll = Arc::clone(poll);
            let name = format!("spark-netpoll-{}", poll.id());
            let spawned = thread::Builder::new().name(name).spawn(move || poll.run());
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(source) => {
                    for poll in &loops {
                        poll.close();
                    }
                    return Err(NetpollError::io(POLLER, source));
                }
            }
        }
        info!(pollers = loops.len(), "poll manager started");
        Ok(Arc::new(Self {
            loops,
            threads: Mutex::new(threads),
            next: AtomicUsize::new(0),
        }))
    }

    /// 轮转选出下一个轮询线程。
    pub fn pick(&self) -> Arc<PollLoop> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        Arc::clone(&self.loops[index])
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// 关闭全部轮询线程并等待其退出。在轮询线程内部调用时不等待自身。
    pub fn close(&self) {
        for poll in &self.loops {
            poll.close();
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("poll thread panicked before shutdown");
            }
        }
    }
}

impl Drop for PollManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_rotates_across_pollers() {
        let manager = PollManager::new(3).expect("创建轮询线程");
        let ids: Vec<usize> = (0..6).map(|_| manager.pick().id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);
        manager.close();
        assert!((0..3).all(|_| manager.pick().is_closed()));
    }
}
