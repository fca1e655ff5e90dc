//! 行回显服务：`cargo run -p spark-netpoll --example echo -- 127.0.0.1:7070`
//!
//! 日志级别经 `RUST_LOG` 调整，例如 `RUST_LOG=spark_netpoll=debug`。

use std::net::SocketAddr;
use std::time::Duration;

use spark_netpoll::{NetpollError, Options, Reader, Runtime, Writer};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), NetpollError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 7070)));

    let runtime = Runtime::from_toml_str("pollers = 2\nread_timeout_ms = 30000\n")?;
    let options = Options::new()
        .on_connect(|conn| info!(peer = ?conn.peer_addr(), "client connected"))
        .on_request(|conn| {
            let line = conn.reader().read_until(b'\n')?;
            let mut writer = conn.writer();
            writer.write_binary(line)?;
            writer.flush()
        })
        .on_disconnect(|conn| info!(peer = ?conn.peer_addr(), "client disconnected"))
        .write_timeout(Duration::from_secs(5));

    let server = runtime.listen(addr, options)?;
    info!(addr = %server.local_addr(), "echo server listening");
    loop {
        std::thread::park();
    }
}
