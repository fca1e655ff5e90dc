use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::error::{DIAL, NetpollError};

/// 建立 TCP 连接并切换为非阻塞模式。
///
/// 连接建立阶段在调用线程上阻塞（受 `timeout` 约束），返回的 socket 可直接交给
/// [`crate::Connection::new`] 或 [`crate::Runtime::attach`]。
pub fn dial_tcp(
    addr: SocketAddr,
    timeout: Option<Duration>,
) -> Result<mio::net::TcpStream, NetpollError> {
    let stream = match timeout {
        Some(timeout) => std::net::TcpStream::connect_timeout(&addr, timeout),
        None => std::net::TcpStream::connect(addr),
    }
    .map_err(|source| NetpollError::io(DIAL, source))?;
    stream
        .set_nonblocking(true)
        .map_err(|source| NetpollError::io(DIAL, source))?;
    if let Err(error) = stream.set_nodelay(true) {
        debug!(%addr, %error, "failed to set TCP_NODELAY");
    }
    Ok(mio::net::TcpStream::from_std(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_dial_reports_dial_code() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("绑定端口");
        let addr = listener.local_addr().expect("读取地址");
        drop(listener);
        let error = dial_tcp(addr, Some(Duration::from_millis(500))).expect_err("端口已关闭");
        assert_eq!(error.code(), "spark.netpoll.dial_failed");
    }
}
