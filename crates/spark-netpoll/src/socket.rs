use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};

/// 引擎可驱动的非阻塞流式 socket。
///
/// 读写均以 `&self` 进行：轮询线程与发起 `flush` 的应用线程可能同时持有同一 socket，
/// 并发写入由连接内部的输出锁串行化，读取只发生在轮询线程上。
pub trait Socket: Send + Sync + 'static {
    fn fd(&self) -> RawFd;

    fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// 关闭读写两个方向，对端随即读到 EOF。
    fn shutdown(&self) -> io::Result<()>;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Socket for mio::net::TcpStream {
    fn fd(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        Read::read_vectored(&mut &*self, bufs)
    }

    fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Write::write_vectored(&mut &*self, bufs)
    }

    fn shutdown(&self) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, Shutdown::Both)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        mio::net::TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        mio::net::TcpStream::peer_addr(self).ok()
    }
}

impl Socket for mio::net::UnixStream {
    fn fd(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        Read::read_vectored(&mut &*self, bufs)
    }

    fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Write::write_vectored(&mut &*self, bufs)
    }

    fn shutdown(&self) -> io::Result<()> {
        mio::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}
