//! 帧协议的性质测试。
//!
//! - **Why**：固定向量只覆盖少数长度，这里用 proptest 覆盖任意负载长度与票据，
//!   并确认解码器面对任意字节不会 panic、也不会读过一帧的边界。
//! - **What**：
//!   1. 负载长度为 S 的帧解码后负载恰为 S 字节，票据不变；
//!   2. 任意输入下解码要么成功、要么返回错误，消费的字节数不超过声明的帧长。

use proptest::prelude::*;
use spark_rpc_wire::{
    Fetch, FrameBuffer, FrameHeader, HEADER_SIZE, RawMessage, Ticket, decode_frame, encode_frame,
};
use std::io::Cursor;

const CAPACITY: usize = 512;

proptest! {
    #[test]
    fn prop_round_trip_keeps_size_and_ticket(
        raw_ticket in 1u64..,
        payload in proptest::collection::vec(any::<u8>(), 0..=CAPACITY - HEADER_SIZE),
    ) {
        let ticket = Ticket::new(raw_ticket).expect("范围保证非零");
        let mut outbound = FrameBuffer::with_capacity(CAPACITY);
        let total = encode_frame(ticket, &RawMessage::new(payload.clone()), &mut outbound)
            .expect("容量内的负载必须编码成功");
        prop_assert_eq!(total, HEADER_SIZE + payload.len());

        let mut inbound = FrameBuffer::with_capacity(CAPACITY);
        let fetch = decode_frame(&mut Cursor::new(outbound.remaining().to_vec()), &mut inbound)
            .expect("合法帧必须解码成功");
        prop_assert_eq!(fetch, Fetch::Frame(ticket));
        prop_assert_eq!(inbound.remaining(), payload.as_slice());
    }

    #[test]
    fn prop_decoder_never_reads_past_declared_frame(
        input in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut cursor = Cursor::new(input.clone());
        let mut buffer = FrameBuffer::with_capacity(128);
        let outcome = decode_frame(&mut cursor, &mut buffer);
        let consumed = cursor.position() as usize;

        if let Ok(header) = FrameHeader::parse(&input) {
            let declared = HEADER_SIZE + header.length as usize;
            prop_assert!(consumed <= declared.min(input.len()));
        }
        if let Ok(Fetch::Frame(_)) = outcome {
            prop_assert!(buffer.remaining().len() <= buffer.max_payload());
            prop_assert_eq!(consumed, HEADER_SIZE + buffer.remaining().len());
        }
    }
}
