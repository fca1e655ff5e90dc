//! `link_buffer_props` 属性测试：任意的写入切分与读取切分下，字节序列保持不变。

use bytes::Bytes;
use proptest::prelude::*;
use spark_buffer::{BufferConfig, LinkBuffer, Reader, SegmentPool, Writer};

#[derive(Clone, Debug)]
enum Write {
    Malloc(Vec<u8>),
    Binary(Vec<u8>),
    Flush,
}

#[derive(Clone, Debug)]
enum Read {
    Next(usize),
    Peek(usize),
    Skip(usize),
    Copy(usize),
    Slice(usize),
}

fn write_op() -> impl Strategy<Value = Write> {
    prop_oneof![
        4 => proptest::collection::vec(any::<u8>(), 1..40).prop_map(Write::Malloc),
        2 => proptest::collection::vec(any::<u8>(), 1..80).prop_map(Write::Binary),
        1 => Just(Write::Flush),
    ]
}

fn read_op() -> impl Strategy<Value = Read> {
    prop_oneof![
        (1usize..60).prop_map(Read::Next),
        (1usize..60).prop_map(Read::Peek),
        (1usize..60).prop_map(Read::Skip),
        (1usize..60).prop_map(Read::Copy),
        (1usize..60).prop_map(Read::Slice),
    ]
}

proptest! {
    #[test]
    fn reads_observe_committed_bytes_in_order(
        writes in proptest::collection::vec(write_op(), 1..40),
        reads in proptest::collection::vec(read_op(), 1..60),
    ) {
        let config = BufferConfig {
            segment_size: 16,
            nocopy_threshold: 24,
            max_tail_capacity: 32,
        };
        let mut link = LinkBuffer::with_pool(config, SegmentPool::new());
        let mut model: Vec<u8> = Vec::new();

        for op in writes {
            match op {
                Write::Malloc(data) => {
                    link.malloc(data.len()).expect("malloc").copy_from_slice(&data);
                    model.extend_from_slice(&data);
                }
                Write::Binary(data) => {
                    model.extend_from_slice(&data);
                    link.write_binary(Bytes::from(data)).expect("write_binary");
                }
                Write::Flush => link.flush().expect("flush"),
            }
        }
        link.flush().expect("flush");
        prop_assert_eq!(link.len(), model.len());

        let mut cursor = 0usize;
        for op in reads {
            let remaining = model.len() - cursor;
            match op {
                Read::Next(n) if n <= remaining => {
                    let out = link.next(n).expect("next");
                    prop_assert_eq!(out.as_ref(), &model[cursor..cursor + n]);
                    cursor += n;
                }
                Read::Peek(n) if n <= remaining => {
                    let out = link.peek(n).expect("peek");
                    prop_assert_eq!(out, &model[cursor..cursor + n]);
                }
                Read::Skip(n) if n <= remaining => {
                    link.skip(n).expect("skip");
                    cursor += n;
                }
                Read::Copy(n) if n <= remaining => {
                    let out = link.read_copy(n).expect("read_copy");
                    prop_assert_eq!(out.as_slice(), &model[cursor..cursor + n]);
                    cursor += n;
                }
                Read::Slice(n) if n <= remaining => {
                    let mut sliced = link.slice(n).expect("slice");
                    let out = sliced.next(n).expect("next on slice");
                    prop_assert_eq!(out.as_ref(), &model[cursor..cursor + n]);
                    cursor += n;
                }
                Read::Next(n) | Read::Peek(n) | Read::Skip(n) | Read::Copy(n) | Read::Slice(n) => {
                    prop_assert!(link.next(n).is_err());
                }
            }
            prop_assert_eq!(link.len(), model.len() - cursor);
        }
        link.release();
    }
}
