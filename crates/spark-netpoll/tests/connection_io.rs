//! `connection_io` 集成测试：验证连接上的阻塞读写语义。
//!
//! # 测试目标（Why）
//! - 读超时到期后以 `Timeout` 返回，连接保持可用，之后到达的数据仍可读取；
//! - 对端关闭后，已到达的数据仍可读完，再读才得到关闭错误；
//! - 超过内核发送缓冲的大块 `flush` 经由写关注异步发完，之后连接照常读取；
//! - 对端不读取时 `flush` 按写超时返回，连接保持打开；
//! - 阻塞 `read_until` 跨多次到达的数据拼出完整的一行。

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use spark_netpoll::{
    CloseReason, Connection, FLUSH, NetpollError, Options, READ, Reader, Runtime, Writer,
};

const WAIT: Duration = Duration::from_secs(5);

fn runtime() -> Runtime {
    Runtime::from_toml_str("pollers = 1\nmax_workers = 8\n").expect("启动运行时")
}

fn pair(runtime: &Runtime, options: Options) -> (Connection, UnixStream) {
    let (client, server) = UnixStream::pair().expect("创建 socket 对");
    server.set_nonblocking(true).expect("设置非阻塞");
    client.set_read_timeout(Some(WAIT)).expect("设置客户端读超时");
    let conn = runtime
        .attach(mio::net::UnixStream::from_std(server), options)
        .expect("注册连接");
    (conn, client)
}

#[test]
fn read_timeout_unblocks_and_keeps_connection_open() {
    let runtime = runtime();
    let (conn, mut client) = pair(
        &runtime,
        Options::new().read_timeout(Duration::from_millis(50)),
    );

    let started = Instant::now();
    let error = conn.reader().next(10).expect_err("数据不足应超时");
    let elapsed = started.elapsed();
    assert!(matches!(error, NetpollError::Timeout { operation } if operation == READ));
    assert!(elapsed >= Duration::from_millis(45), "过早返回: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "超时未及时生效: {elapsed:?}");
    assert!(conn.is_active());

    conn.set_read_timeout(Some(WAIT));
    client.write_all(&[7u8; 10]).expect("客户端写入");
    let data = conn.reader().next(10).expect("数据到达后可读");
    assert_eq!(&data[..], &[7u8; 10]);

    conn.close();
    runtime.shutdown();
}

#[test]
fn deadline_takes_precedence_over_timeout() {
    let runtime = runtime();
    let (conn, _client) = pair(&runtime, Options::new().read_timeout(WAIT));
    conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(30)));

    let started = Instant::now();
    let error = conn.reader().peek(1).expect_err("截止时间到期");
    assert_eq!(error.code(), "spark.netpoll.read_timeout");
    assert!(started.elapsed() < Duration::from_secs(1));

    conn.close();
    runtime.shutdown();
}

#[test]
fn buffered_input_survives_peer_close() {
    let runtime = runtime();
    let (conn, mut client) = pair(&runtime, Options::new().read_timeout(WAIT));

    client.write_all(b"tail").expect("客户端写入");
    drop(client);

    let mut reader = conn.reader();
    assert_eq!(&reader.next(4).expect("读取已到达的数据")[..], b"tail");
    let error = reader.next(1).expect_err("对端已关闭");
    drop(reader);
    assert!(matches!(
        error,
        NetpollError::ConnectionClosed {
            reason: CloseReason::Peer
        }
    ));
    assert!(!conn.is_active());
    runtime.shutdown();
}

#[test]
fn large_flush_drains_through_write_interest() {
    let runtime = runtime();
    let (conn, mut client) = pair(&runtime, Options::new().write_timeout(WAIT * 2));

    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let receiver = thread::spawn(move || {
        let mut received = vec![0u8; expected.len()];
        client.read_exact(&mut received).expect("客户端读取");
        (received == expected, client)
    });

    {
        let mut writer = conn.writer();
        writer
            .write_binary(Bytes::from(payload))
            .expect("挂接大块数据");
        writer.flush().expect("全部发送完成");
    }
    let (intact, mut client) = receiver.join().expect("接收线程不应 panic");
    assert!(intact);

    // 发完之后写关注已撤销，读路径不受影响。
    client.write_all(b"ack").expect("客户端回应");
    assert_eq!(&conn.reader().next(3).expect("读取回应")[..], b"ack");

    conn.close();
    runtime.shutdown();
}

#[test]
fn flush_times_out_against_non_reading_peer() {
    let runtime = runtime();
    let (conn, _client) = pair(
        &runtime,
        Options::new().write_timeout(Duration::from_millis(50)),
    );

    let started = Instant::now();
    let error = {
        let mut writer = conn.writer();
        writer
            .write_binary(Bytes::from(vec![3u8; 8 * 1024 * 1024]))
            .expect("挂接大块数据");
        writer.flush().expect_err("对端不读取，发送无法完成")
    };
    let elapsed = started.elapsed();
    assert!(matches!(error, NetpollError::Timeout { operation } if operation == FLUSH));
    assert_eq!(error.code(), "spark.netpoll.flush_timeout");
    assert!(elapsed < Duration::from_secs(1), "写超时未及时生效: {elapsed:?}");
    assert!(conn.is_active());

    conn.close();
    runtime.shutdown();
}

#[test]
fn blocking_read_until_spans_arrivals() {
    let runtime = runtime();
    let (conn, mut client) = pair(&runtime, Options::new().read_timeout(WAIT));

    let writer = thread::spawn(move || {
        client.write_all(b"GET /index").expect("写入前半段");
        thread::sleep(Duration::from_millis(30));
        client.write_all(b".html\nrest").expect("写入后半段");
        client
    });

    let line = conn.reader().read_until(b'\n').expect("读到完整一行");
    assert_eq!(&line[..], b"GET /index.html\n");
    let _client = writer.join().expect("写线程不应 panic");
    assert_eq!(&conn.reader().next(4).expect("读取剩余")[..], b"rest");

    conn.close();
    runtime.shutdown();
}

#[test]
fn writes_after_close_report_local_close() {
    let runtime = runtime();
    let (conn, _client) = pair(&runtime, Options::new());
    conn.close();

    let mut writer = conn.writer();
    writer.write_slice(b"late").expect("写入缓冲本身不检查连接状态");
    let error = writer.flush().expect_err("关闭后无法发送");
    assert_eq!(error.code(), spark_netpoll::codes::CLOSED_LOCAL);
    runtime.shutdown();
}
