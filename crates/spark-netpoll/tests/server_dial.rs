//! `server_dial` 集成测试：经由运行时监听、拨号并完成一次 TCP 回显。
//!
//! # 测试目标（Why）
//! - 服务端在轮询线程上接受连接并以统一的回调注册；
//! - 客户端连接与服务端连接走同一条注册路径，阻塞读写守卫在两侧都可用；
//! - `shutdown` 之后服务端不再接受新连接。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use spark_netpoll::{NetpollConfig, Options, Reader, Runtime, Writer};

const WAIT: Duration = Duration::from_secs(5);

fn echo() -> Options {
    Options::new().on_request(|conn| {
        let data = {
            let mut reader = conn.reader();
            let n = reader.len();
            reader.next(n)?
        };
        let mut writer = conn.writer();
        writer.write_binary(data)?;
        writer.flush()
    })
}

#[test]
fn dialed_connection_round_trips_through_server() {
    let runtime = Runtime::from_toml_str("pollers = 2").expect("启动运行时");
    let server = runtime
        .listen("127.0.0.1:0".parse().expect("地址"), echo())
        .expect("监听");

    let client = runtime
        .dial_tcp(
            server.local_addr(),
            Some(Duration::from_secs(2)),
            Options::new().read_timeout(WAIT),
        )
        .expect("拨号");
    assert_eq!(client.peer_addr(), Some(server.local_addr()));

    for line in [&b"ping\n"[..], &b"second line\n"[..]] {
        {
            let mut writer = client.writer();
            writer.write_slice(line).expect("写入请求");
            writer.flush().expect("发送请求");
        }
        let reply = client.reader().read_until(b'\n').expect("读取回显");
        assert_eq!(&reply[..], line);
    }

    let deadline = Instant::now() + WAIT;
    while server.accepted() < 1 {
        assert!(Instant::now() < deadline, "服务端未记录新连接");
        thread::sleep(Duration::from_millis(2));
    }
    client.close();
    server.shutdown();
    runtime.shutdown();
}

#[test]
fn shutdown_server_stops_accepting() {
    let runtime = Runtime::new(NetpollConfig::default()).expect("启动运行时");
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connects);
    let server = runtime
        .listen(
            "127.0.0.1:0".parse().expect("地址"),
            Options::new().on_connect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("监听");
    let addr = server.local_addr();
    server.shutdown();

    // 监听 socket 仍然打开，内核会完成握手，但连接不会再被接受和注册。
    let _stream = std::net::TcpStream::connect_timeout(&addr, WAIT).expect("内核完成握手");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(server.accepted(), 0);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    runtime.shutdown();
}
