//! `link_buffer_contract` 集成测试：从公开 API 验证链式缓冲的读写语义。
//!
//! # 测试目标（Why）
//! - 覆盖预留/提交可见性、跨段读取、头部插入、切片与 `peek` 缓存等核心路径；
//! - 读写拆分后在两个线程上并发运行，确认字节按提交顺序完整到达。
//!
//! # 结构安排（How）
//! - 段长刻意设置得很小（16 字节或 2048 字节），让少量数据即可跨越多个段。

use std::thread;

use bytes::Bytes;
use spark_buffer::{BufferConfig, BufferError, LinkBuffer, Reader, SegmentPool, Writer};

fn buffer_with_segment(segment_size: usize) -> LinkBuffer {
    LinkBuffer::with_pool(
        BufferConfig::with_segment_size(segment_size),
        SegmentPool::new(),
    )
}

fn write_in_chunks(link: &mut LinkBuffer, data: &[u8], chunk: usize) {
    for part in data.chunks(chunk) {
        link.malloc(part.len())
            .expect("预留空间")
            .copy_from_slice(part);
    }
    link.flush().expect("提交");
}

/// 先写正文再补头部：`write_direct` 把头部插入到正文之前。
#[test]
fn header_inserted_before_reserved_body() {
    let mut link = buffer_with_segment(4096);
    let body = link.malloc(100).expect("预留正文");
    body.fill(b'b');
    let header = Bytes::from_static(b"HEADER-12345");
    link.write_direct(header.clone(), 100).expect("插入头部");
    assert_eq!(link.reserved_len(), 112);
    link.flush().expect("提交");

    let frame = link.next(112).expect("读取整帧");
    assert_eq!(&frame[..12], header.as_ref());
    assert!(frame[12..].iter().all(|byte| *byte == b'b'));
}

#[test]
fn write_direct_splits_reserved_region() {
    let mut link = buffer_with_segment(64);
    link.malloc(10).expect("预留").fill(b'a');
    link.write_direct(Bytes::from_static(b"XY"), 4)
        .expect("插入");
    link.flush().expect("提交");
    assert_eq!(link.read_copy(12).expect("读取"), b"aaaaaaXYaaaa".to_vec());
}

#[test]
fn write_direct_rejects_offset_beyond_reserved() {
    let mut link = buffer_with_segment(64);
    link.malloc(4).expect("预留");
    let err = link
        .write_direct(Bytes::from_static(b"h"), 5)
        .expect_err("越界插入应失败");
    assert_eq!(err.code(), "spark.buffer.exceeds_reserved");
}

/// 2048 字节的段上写入 3000 字节：跨段的 `next` 返回连续拷贝，内容与写入一致。
#[test]
fn cross_segment_next_returns_contiguous_bytes() {
    let mut link = buffer_with_segment(2048);
    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    write_in_chunks(&mut link, &data, 2048);

    assert_eq!(link.len(), 3000);
    let out = link.next(3000).expect("跨段读取");
    assert_eq!(out.as_ref(), data.as_slice());
    assert!(link.is_empty());
}

#[test]
fn next_within_segment_is_zero_copy() {
    let mut link = buffer_with_segment(64);
    link.write_slice(b"zero-copy").expect("写入");
    link.flush().expect("提交");
    let peeked = link.peek(4).expect("peek").as_ptr();
    let taken = link.next(4).expect("next");
    assert_eq!(taken.as_ptr(), peeked);
}

/// 跨段 `peek` 逐步加长时，较短结果始终是较长结果的前缀。
#[test]
fn growing_peeks_agree_on_prefix() {
    let mut link = buffer_with_segment(16);
    let data: Vec<u8> = (0..48u8).collect();
    write_in_chunks(&mut link, &data, 16);

    let short = link.peek(20).expect("peek 20").to_vec();
    let long = link.peek(40).expect("peek 40").to_vec();
    assert_eq!(&long[..20], short.as_slice());
    assert_eq!(long.as_slice(), &data[..40]);
    assert_eq!(link.len(), 48, "peek 不推进读指针");

    link.skip(17).expect("skip");
    assert_eq!(link.peek(3).expect("peek after skip"), &data[17..20]);
}

#[test]
fn insufficient_data_leaves_buffer_untouched() {
    let mut link = buffer_with_segment(16);
    link.write_slice(b"abc").expect("写入");
    link.flush().expect("提交");

    assert_eq!(
        link.next(5),
        Err(BufferError::InsufficientData {
            requested: 5,
            available: 3
        })
    );
    assert_eq!(link.len(), 3);
    assert_eq!(link.next(3).expect("读取").as_ref(), b"abc");
}

#[test]
fn read_until_waits_for_delimiter() {
    let mut link = buffer_with_segment(16);
    link.write_slice(b"GET / HTTP/1.1").expect("写入");
    link.flush().expect("提交");
    assert!(matches!(
        link.read_until(b'\n'),
        Err(BufferError::InsufficientData { .. })
    ));

    link.write_slice(b"\r\nHost").expect("写入");
    link.flush().expect("提交");
    let line = link.read_until(b'\n').expect("读取整行");
    assert_eq!(line.as_ref(), b"GET / HTTP/1.1\r\n");
    assert_eq!(link.len(), 4);
}

/// 切片得到只读的独立读端，原缓冲同时前进并自动释放。
#[test]
fn slice_shares_memory_and_advances_origin() {
    let mut link = buffer_with_segment(16);
    write_in_chunks(&mut link, b"hello, sliced world", 8);

    let mut sliced = link.slice(12).expect("切片");
    assert_eq!(sliced.len(), 12);
    assert_eq!(link.len(), 7);
    assert_eq!(sliced.next(5).expect("读取切片").as_ref(), b"hello");
    assert_eq!(sliced.read_copy(7).expect("读取切片"), b", slice".to_vec());
    assert!(sliced.is_empty());
    assert_eq!(link.next(7).expect("读取原缓冲").as_ref(), b"d world");
}

/// 4000 字节跨越两个 2048 字节的段：切片在原缓冲释放并丢弃之后仍然完整可读。
#[test]
fn cross_segment_slice_outlives_released_origin() {
    let mut link = LinkBuffer::with_config(BufferConfig::with_segment_size(2048))
        .expect("合法配置");
    let data: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
    write_in_chunks(&mut link, &data, 2048);
    assert_eq!(link.writer().readable_len(), 4000);

    let mut sliced = link.slice(4000).expect("跨段切片");
    assert!(sliced.segment_count() >= 2, "切片应引用多个段");
    assert!(link.is_empty());
    link.release();
    drop(link);

    assert_eq!(sliced.next(4000).expect("读取切片").as_ref(), data.as_slice());
    assert!(sliced.is_empty());
}

#[test]
fn repeated_release_is_idempotent() {
    let mut link = buffer_with_segment(16);
    write_in_chunks(&mut link, b"0123456789abcdefghij", 8);
    assert_eq!(link.next(10).expect("读取").as_ref(), b"0123456789");
    link.release();
    link.release();
    assert_eq!(link.len(), 10);
    link.release();
    assert_eq!(link.read_copy(10).expect("读取剩余"), b"abcdefghij".to_vec());
    link.release();
    assert!(link.is_empty());
}

#[test]
fn invalid_config_is_rejected() {
    let err = LinkBuffer::with_config(BufferConfig::with_segment_size(0)).expect_err("段长为零");
    assert_eq!(err.code(), "spark.buffer.invalid_argument");
}

#[test]
fn rolled_back_bytes_never_reach_reader() {
    let mut link = buffer_with_segment(16);
    link.malloc(10).expect("预留").fill(b'k');
    link.malloc(10).expect("预留").fill(b'x');
    link.malloc_ack(10).expect("回滚");
    link.flush().expect("提交");
    assert_eq!(link.read_copy(10).expect("读取"), vec![b'k'; 10]);
    assert!(link.is_empty());
}

/// 写端与读端分处两个线程：读端观察到的字节恰好是提交序列的拼接。
#[test]
fn split_halves_preserve_order_across_threads() {
    let link = buffer_with_segment(32);
    let (mut writer, mut reader) = link.split();
    const FRAMES: u32 = 2_000;

    let producer = thread::spawn(move || {
        for i in 0..FRAMES {
            writer.write_slice(&i.to_be_bytes()).expect("写入");
            if i % 7 == 0 {
                writer.flush().expect("提交");
            }
        }
        writer.flush().expect("提交");
    });

    let mut expected = 0u32;
    while expected < FRAMES {
        match reader.next(4) {
            Ok(frame) => {
                let value = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
                assert_eq!(value, expected);
                expected += 1;
                reader.release();
            }
            Err(BufferError::InsufficientData { .. }) => thread::yield_now(),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    producer.join().expect("写线程退出");
    assert!(reader.is_empty());
}
