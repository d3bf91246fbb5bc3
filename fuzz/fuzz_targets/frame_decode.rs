#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spark_rpc_wire::{Fetch, FrameBuffer, HEADER_SIZE, RawMessage, decode_frame, encode_frame};
use std::io::{self, Read};

/// Fuzz 用例：任意字节流 + 任意分片方式 + 任意缓冲容量。
///
/// - **Why**：解码器直接面对网络字节，任何输入都不能导致 panic、越界读取或死循环；
/// - **How**：`chunks` 决定每次 `read` 返回的字节数，0 被解释为一次 `WouldBlock`，
///   模拟非阻塞套接字上的碎片化到达；
/// - **What**：解码出的每一帧负载都不超过缓冲的负载上限，且能以同一票据重新编码为等长帧。
#[derive(Debug, Arbitrary)]
struct DecodeCase {
    stream: Vec<u8>,
    chunks: Vec<u8>,
    capacity: u16,
}

/// 按脚本切片返回数据的读端。
struct ChunkedReader<'a> {
    data: &'a [u8],
    chunks: std::slice::Iter<'a, u8>,
    would_block_budget: usize,
}

impl Read for ChunkedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }
        let step = match self.chunks.next() {
            Some(0) if self.would_block_budget > 0 => {
                self.would_block_budget -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            Some(step) => usize::from(*step).max(1),
            None => self.data.len(),
        };
        let take = step.min(buf.len()).min(self.data.len());
        buf[..take].copy_from_slice(&self.data[..take]);
        self.data = &self.data[take..];
        Ok(take)
    }
}

fuzz_target!(|case: DecodeCase| {
    let capacity = HEADER_SIZE + usize::from(case.capacity % 4096);
    let mut reader = ChunkedReader {
        data: &case.stream,
        chunks: case.chunks.iter(),
        would_block_budget: 64,
    };
    let mut inbound = FrameBuffer::with_capacity(capacity);
    let mut outbound = FrameBuffer::with_capacity(capacity);

    for _ in 0..1024 {
        match decode_frame(&mut reader, &mut inbound) {
            Ok(Fetch::Frame(ticket)) => {
                let payload = inbound.remaining().to_vec();
                assert!(payload.len() <= inbound.max_payload());
                let total = encode_frame(ticket, &RawMessage::new(payload.clone()), &mut outbound)
                    .expect("decoded payload must fit the same capacity");
                assert_eq!(total, HEADER_SIZE + payload.len());
                assert!(ticket.get() > 0);
            }
            Ok(Fetch::Idle) => continue,
            Ok(Fetch::Closed) | Err(_) => break,
        }
    }
});
