use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::state::{CloseBy, ConnState};
use super::{Connection, Hooks, Inner, Options};
use crate::error::{NetpollError, panic_message};
use crate::poll::{Interest, IoHandler, PollLoop};
use crate::worker::{Executor, WorkerPool};

impl Connection {
    /// 绑定回调并把连接登记到轮询线程，随后调度 `on_connect`。
    ///
    /// # 契约（What）
    /// - 每条连接只能注册一次，重复注册返回 `InvalidState`；
    /// - 多路复用器拒绝登记时返回 `Registration`，连接随即被关闭；
    /// - 成功返回后，`on_connect` 已交给执行器，首个 `on_request` 一定在它之后运行。
    pub fn register(&self, options: Options, poll: &Arc<PollLoop>) -> Result<(), NetpollError> {
        let inner = &self.inner;
        let Options {
            on_connect,
            on_request,
            on_disconnect,
            read_timeout,
            write_timeout,
            executor,
        } = options;
        let hooks = Hooks {
            on_connect,
            on_request,
            on_disconnect,
        };
        if inner.hooks.set(hooks).is_err() {
            return Err(NetpollError::InvalidState("connection already registered"));
        }
        let executor =
            executor.unwrap_or_else(|| Arc::new(WorkerPool::global()) as Arc<dyn Executor>);
        let _ = inner.executor.set(executor);
        {
            let mut deadlines = inner.deadlines.lock();
            if read_timeout.is_some() {
                deadlines.read_timeout = read_timeout;
            }
            if write_timeout.is_some() {
                deadlines.write_timeout = write_timeout;
            }
        }

        if let Err(error) = inner.prepare(poll) {
            warn!(fd = inner.fd, code = error.code(), %error, "connection registration failed");
            inner.close();
            return Err(error);
        }
        debug!(fd = inner.fd, poller = poll.id(), "connection registered");
        inner.schedule();
        Ok(())
    }
}

impl Inner {
    pub(super) fn handle(&self) -> Option<Connection> {
        self.me.upgrade().map(|inner| Connection { inner })
    }

    fn prepare(&self, poll: &Arc<PollLoop>) -> Result<(), NetpollError> {
        let handler: Arc<dyn IoHandler> = self
            .me
            .upgrade()
            .ok_or(NetpollError::InvalidState("connection dropped"))?;
        let operator = poll.insert_stream(Arc::clone(&self.socket), handler)?;
        *self.operator.lock() = Some(Arc::clone(&operator));
        operator.arm(Interest::Readable)?;
        // 登记期间可能已被关闭，此时清理未必看到了句柄。
        if self.close_by.is_closed() {
            self.detach();
        }
        Ok(())
    }

    pub(super) fn has_request_hook(&self) -> bool {
        self.hooks
            .get()
            .is_some_and(|hooks| hooks.on_request.is_some())
    }

    /// 抢到处理标记时把处理循环投递到执行器；标记被占用时什么也不做，
    /// 持有者会在退出前复查新数据。
    pub(super) fn schedule(&self) {
        if !self.process.try_acquire() {
            return;
        }
        self.spawn(Inner::run_process);
    }

    fn spawn(&self, job: fn(&Inner, &Connection)) {
        let Some(conn) = self.handle() else {
            return;
        };
        let task = Box::new(move || job(&conn.inner, &conn));
        match self.executor.get() {
            Some(executor) => executor.execute(task),
            None => task(),
        }
    }

    /// 处理循环的任务入口。回调中的 panic 在此被捕获：连接被强制关闭，清理照常执行。
    fn run_process(&self, conn: &Connection) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_loop(conn)));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(fd = self.fd, panic = %message, "connection hook panicked");
            let _ = self.fault.set(message);
            if !self.close_by.claim(CloseBy::User) {
                self.close_by.force(CloseBy::User);
            }
            self.wake_waiters();
            self.cleanup(conn);
        }
    }

    /// 回调配对：只有完成 `Pending → Connected` 的连接才会收到 `on_request`，
    /// 也只有它们会在清理时收到 `on_disconnect`。对端提前关闭不影响这一配对。
    fn process_loop(&self, conn: &Connection) {
        let hooks = self.hooks.get();
        let on_request = hooks.and_then(|hooks| hooks.on_request.as_ref());
        loop {
            // 应用已主动关闭的连接不再建立；对端关闭时仍先完成建立，再交付已到达的数据。
            if self.close_by.get() != CloseBy::User
                && self.state.change(ConnState::Pending, ConnState::Connected)
            {
                if let Some(on_connect) = hooks.and_then(|hooks| hooks.on_connect.as_ref()) {
                    on_connect(conn);
                }
                debug!(fd = self.fd, "connection established");
            }

            if let Some(on_request) = on_request {
                while self.state.get() == ConnState::Connected
                    && self.close_by.get() != CloseBy::User
                    && self.input_len.get() > 0
                {
                    if let Err(error) = on_request(conn) {
                        debug!(fd = self.fd, code = error.code(), %error, "request handler returned error");
                        // 剩余字节已无法凑成完整请求。
                        if error.is_closed() {
                            break;
                        }
                    }
                }
            }

            if self.close_by.is_closed() {
                self.cleanup(conn);
                return;
            }

            self.process.release();
            let closed = self.close_by.is_closed();
            let more = on_request.is_some() && self.input_len.get() > 0;
            if !closed && !more {
                return;
            }
            if !self.process.try_acquire() {
                return;
            }
        }
    }

    /// 轮询线程发现对端关闭或连接出错。
    pub(super) fn hang_up(&self) {
        if !self.close_by.claim(CloseBy::Poller) {
            return;
        }
        debug!(fd = self.fd, "connection closed by peer");
        self.wake_waiters();
        // 经由处理循环清理：尚未建立的连接先完成 `on_connect`，保证与 `on_disconnect` 成对。
        if self.process.try_acquire() {
            self.spawn(Inner::run_process);
        }
    }

    pub(super) fn close(&self) {
        if self.close_by.claim(CloseBy::User) {
            debug!(fd = self.fd, "connection closed locally");
            self.wake_waiters();
        } else {
            self.close_by.force(CloseBy::User);
        }
        if self.process.try_acquire() {
            if let Some(conn) = self.handle() {
                self.cleanup(&conn);
            }
        }
    }

    /// 调用方必须持有处理标记。
    fn cleanup(&self, conn: &Connection) {
        self.process.finish();
        self.detach();

        if self.state.change(ConnState::Connected, ConnState::Disconnected) {
            let on_disconnect = self.hooks.get().and_then(|hooks| hooks.on_disconnect.as_ref());
            if let Some(on_disconnect) = on_disconnect {
                guarded(self.fd, || on_disconnect(conn));
            }
        } else {
            self.state.change(ConnState::Pending, ConnState::Disconnected);
        }

        let callbacks = self.close_callbacks.lock().take().unwrap_or_default();
        for callback in callbacks.into_iter().rev() {
            guarded(self.fd, || callback(conn));
        }

        if let Err(error) = self.socket.shutdown() {
            debug!(fd = self.fd, %error, "socket shutdown failed");
        }
        self.release_buffers();
        debug!(fd = self.fd, "connection cleaned up");
    }

    fn detach(&self) {
        let operator = self.operator.lock().take();
        if let Some(operator) = operator {
            if let Err(error) = operator.detach() {
                warn!(fd = self.fd, token = operator.token(), code = error.code(), %error, "detach failed");
            }
        }
    }

    /// 读写守卫可能仍被持有（例如在回调内部关闭），此时跳过对应缓冲。
    /// 对端关闭时保留未读输入，读者仍可取完已到达的数据。
    fn release_buffers(&self) {
        if self.close_by.get() == CloseBy::User {
            if let Some(mut input) = self.input.try_lock() {
                input.clear();
            }
        }
        if let Some(mut writer) = self.input_writer.try_lock() {
            writer.clear();
        }
        if let Some(mut output) = self.output.try_lock() {
            output.clear();
        }
        if let Some(mut drain) = self.drain.try_lock() {
            drain.clear();
        }
    }
}

fn guarded(fd: RawFd, hook: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        error!(fd, panic = %panic_message(payload.as_ref()), "connection hook panicked");
    }
}
