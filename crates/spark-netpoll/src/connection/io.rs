use std::io::{self, IoSlice, IoSliceMut};
use std::sync::atomic::{Ordering, fence};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::MutexGuard;
use spark_buffer::{LinkReader, LinkWriter, Reader, Writer};
use tracing::{debug, trace};

use super::Inner;
use super::state::CloseBy;
use crate::error::{CloseReason, FLUSH, NetpollError, READ};
use crate::poll::{IoHandler, PollEvent};

/// 单次 `writev` 最多携带的段数。
const MAX_IOVEC: usize = 64;

/// 容量为 1 的唤醒信号：重复通知合并为一次，等待方醒来后自行复查条件。
pub(super) struct Signal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Signal {
    pub(super) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { tx, rx }
    }

    pub(super) fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// 收到通知返回 `true`，截止时间已过返回 `false`。
    pub(super) fn wait(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => match self.rx.recv_deadline(deadline) {
                Ok(()) => true,
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => true,
            },
            None => self.rx.recv().is_ok(),
        }
    }
}

/// 输出缓冲的消费端，由轮询线程与 `flush` 调用方共享。
pub(super) struct OutputDrain {
    reader: LinkReader,
    write_registered: bool,
}

impl OutputDrain {
    pub(super) fn new(reader: LinkReader) -> Self {
        Self {
            reader,
            write_registered: false,
        }
    }

    pub(super) fn clear(&mut self) {
        self.reader.clear();
    }

    /// 以一次 `writev` 发送队首的若干段，并确认实际写出的字节。
    fn send_with(
        &mut self,
        send: &mut dyn FnMut(&[IoSlice<'_>]) -> io::Result<usize>,
    ) -> io::Result<usize> {
        let written = {
            let slices = self.reader.io_slices(MAX_IOVEC);
            if slices.is_empty() {
                return Ok(0);
            }
            send(&slices)?
        };
        if written > 0 {
            self.reader.skip(written).map_err(io::Error::other)?;
            self.reader.release();
        }
        Ok(written)
    }
}

impl Inner {
    pub(super) fn wake_waiters(&self) {
        self.read_signal.notify();
        self.write_signal.notify();
    }

    pub(super) fn closed_error(&self) -> NetpollError {
        if let Some(message) = self.fault.get() {
            return NetpollError::CallbackPanic {
                message: message.clone(),
            };
        }
        match self.close_by.get() {
            CloseBy::User => NetpollError::closed(CloseReason::Local),
            _ => NetpollError::closed(CloseReason::Peer),
        }
    }

    /// 阻塞直到输入缓冲至少有 `n` 字节。
    ///
    /// 对端关闭后，已缓冲的数据仍可读完；数据不足时才返回关闭错误。
    pub(super) fn wait_read(&self, n: usize) -> Result<(), NetpollError> {
        if self.input_len.get() >= n {
            return Ok(());
        }
        self.wait_read_size.store(n, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let deadline = self.deadlines.lock().read();
        let outcome = loop {
            // 先读关闭标记再读长度：关闭之前到达的数据一定可见。
            let closed = self.close_by.is_closed();
            if self.input_len.get() >= n {
                break Ok(());
            }
            if closed {
                break Err(self.closed_error());
            }
            if !self.read_signal.wait(deadline) {
                if self.input_len.get() >= n {
                    break Ok(());
                }
                break Err(NetpollError::timeout(READ));
            }
        };
        self.wait_read_size.store(0, Ordering::SeqCst);
        outcome
    }

    /// 尝试在调用线程上直接发送；内核发送缓冲已满时登记写关注，等待轮询线程发完。
    pub(super) fn send_output(&self) -> Result<(), NetpollError> {
        if self.close_by.is_closed() {
            return Err(self.closed_error());
        }
        {
            let mut drain = self.drain.lock();
            loop {
                match drain.send_with(&mut |bufs| self.socket.write_vectored(bufs)) {
                    Ok(0) => {
                        if drain.reader.is_empty() {
                            self.disarm_write(&mut drain);
                            return Ok(());
                        }
                        debug!(fd = self.fd, "socket accepted no bytes");
                        return Err(NetpollError::closed(CloseReason::Peer));
                    }
                    Ok(_) => continue,
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        debug!(fd = self.fd, %error, "direct send failed");
                        return Err(NetpollError::closed(CloseReason::Peer));
                    }
                }
            }
            if !drain.write_registered {
                let operator = self.operator.lock().clone();
                let Some(operator) = operator else {
                    return Err(self.closed_error());
                };
                operator.control(PollEvent::ReadToReadWrite)?;
                drain.write_registered = true;
                trace!(fd = self.fd, "write interest armed");
            }
        }
        self.wait_flush()
    }

    /// 输出已发完时撤销写关注，避免无用的可写通知。
    fn disarm_write(&self, drain: &mut OutputDrain) {
        if !drain.write_registered {
            return;
        }
        drain.write_registered = false;
        let operator = self.operator.lock().clone();
        if let Some(operator) = operator {
            if let Err(error) = operator.control(PollEvent::ReadWriteToRead) {
                debug!(fd = self.fd, code = error.code(), "failed to drop write interest");
            }
        }
    }

    fn wait_flush(&self) -> Result<(), NetpollError> {
        let deadline = self.deadlines.lock().write();
        loop {
            if self.output_len.get() == 0 {
                return Ok(());
            }
            if self.close_by.is_closed() {
                return Err(self.closed_error());
            }
            if !self.write_signal.wait(deadline) {
                if self.output_len.get() == 0 {
                    return Ok(());
                }
                return Err(NetpollError::timeout(FLUSH));
            }
        }
    }

    /// 读满整个预订区时翻倍预订大小，并记录出现过的最大缓冲长度。
    fn grow_book(&self, n: usize, buffered: usize) {
        let book = self.book_size.load(Ordering::Relaxed);
        if n == self.last_booked.load(Ordering::Relaxed) && book < self.max_book_size {
            let next = (book * 2).min(self.max_book_size);
            self.book_size.store(next, Ordering::Relaxed);
            self.max_size.fetch_max(next, Ordering::Relaxed);
        }
        self.max_size
            .fetch_max(buffered.min(self.max_book_size), Ordering::Relaxed);
    }
}

impl IoHandler for Inner {
    fn inputs(
        &self,
        fill: &mut dyn FnMut(&mut [IoSliceMut<'_>]) -> io::Result<usize>,
    ) -> io::Result<usize> {
        let book_size = self.book_size.load(Ordering::Relaxed);
        let max_size = self.max_size.load(Ordering::Relaxed);
        let mut writer = self.input_writer.lock();
        let mut reservation = writer.reserve(book_size, max_size);
        let booked = reservation.len();
        let n = {
            let mut bufs = [IoSliceMut::new(reservation.as_mut_slice())];
            fill(&mut bufs)?
        };
        if n == 0 {
            return Ok(0);
        }
        reservation.commit(n).map_err(io::Error::other)?;
        self.last_booked.store(booked, Ordering::Relaxed);
        Ok(n)
    }

    fn input_ack(&self, n: usize) {
        let buffered = self.input_len.get();
        self.grow_book(n, buffered);

        fence(Ordering::SeqCst);
        let wanted = self.wait_read_size.load(Ordering::SeqCst);
        if wanted > 0 && buffered >= wanted {
            self.read_signal.notify();
        }
        if self.has_request_hook() {
            self.schedule();
        }
    }

    fn outputs(
        &self,
        drain: &mut dyn FnMut(&[IoSlice<'_>]) -> io::Result<usize>,
    ) -> io::Result<usize> {
        self.drain.lock().send_with(drain)
    }

    fn output_ack(&self, _n: usize) {
        if self.output_len.get() > 0 {
            return;
        }
        {
            let mut drain = self.drain.lock();
            if drain.reader.is_empty() {
                self.disarm_write(&mut drain);
            }
        }
        self.write_signal.notify();
    }

    fn on_hup(&self) {
        self.hang_up();
    }
}

/// 连接输入侧的阻塞读守卫。
///
/// 每个读操作先按读超时等待足够的数据，再委托给底层的 [`LinkReader`]。
pub struct ConnReader<'a> {
    inner: &'a Inner,
    buffer: MutexGuard<'a, LinkReader>,
}

impl<'a> ConnReader<'a> {
    pub(super) fn new(inner: &'a Inner) -> Self {
        Self {
            inner,
            buffer: inner.input.lock(),
        }
    }
}

impl Reader for ConnReader<'_> {
    type Error = NetpollError;

    fn next(&mut self, n: usize) -> Result<Bytes, NetpollError> {
        self.inner.wait_read(n)?;
        Ok(self.buffer.next(n)?)
    }

    fn peek(&mut self, n: usize) -> Result<&[u8], NetpollError> {
        self.inner.wait_read(n)?;
        Ok(self.buffer.peek(n)?)
    }

    fn skip(&mut self, n: usize) -> Result<(), NetpollError> {
        self.inner.wait_read(n)?;
        Ok(self.buffer.skip(n)?)
    }

    /// 等待期间记住已扫描的长度，醒来后只扫描新到达的字节。
    fn read_until(&mut self, delim: u8) -> Result<Bytes, NetpollError> {
        let mut scanned = 0;
        loop {
            let seen = self.buffer.len();
            if let Some(index) = self.buffer.index_byte(delim, scanned) {
                return Ok(self.buffer.next(index + 1)?);
            }
            scanned = seen;
            self.inner.wait_read(scanned + 1)?;
        }
    }

    fn read_copy(&mut self, n: usize) -> Result<Vec<u8>, NetpollError> {
        self.inner.wait_read(n)?;
        Ok(self.buffer.read_copy(n)?)
    }

    fn slice(&mut self, n: usize) -> Result<LinkReader, NetpollError> {
        self.inner.wait_read(n)?;
        Ok(self.buffer.slice(n)?)
    }

    fn release(&mut self) {
        self.buffer.release();
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// 连接输出侧的写守卫。`flush` 提交缓冲并发送，按写超时等待发送完成。
pub struct ConnWriter<'a> {
    inner: &'a Inner,
    buffer: MutexGuard<'a, LinkWriter>,
}

impl<'a> ConnWriter<'a> {
    pub(super) fn new(inner: &'a Inner) -> Self {
        Self {
            inner,
            buffer: inner.output.lock(),
        }
    }
}

impl Writer for ConnWriter<'_> {
    type Error = NetpollError;

    fn malloc(&mut self, n: usize) -> Result<&mut [u8], NetpollError> {
        Ok(self.buffer.malloc(n)?)
    }

    fn malloc_ack(&mut self, n: usize) -> Result<(), NetpollError> {
        Ok(self.buffer.malloc_ack(n)?)
    }

    fn write_binary(&mut self, data: Bytes) -> Result<usize, NetpollError> {
        Ok(self.buffer.write_binary(data)?)
    }

    fn write_slice(&mut self, data: &[u8]) -> Result<usize, NetpollError> {
        Ok(self.buffer.write_slice(data)?)
    }

    fn write_direct(&mut self, extra: Bytes, remaining: usize) -> Result<(), NetpollError> {
        Ok(self.buffer.write_direct(extra, remaining)?)
    }

    fn flush(&mut self) -> Result<(), NetpollError> {
        if !self.inner.close_by.is_closed() {
            self.buffer.flush()?;
        }
        self.inner.send_output()
    }

    fn reserved_len(&self) -> usize {
        self.buffer.reserved_len()
    }
}
