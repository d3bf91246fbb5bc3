//! `frame_vectors` 集成测试：以固定字节向量锁定线上帧格式。
//!
//! # 测试目标（Why）
//! - 帧格式需要与其他语言的对端逐字节互通，任何字段顺序或字节序的回归都必须在这里暴露；
//! - 向量以十六进制字面量书写，直接对照协议文档即可审阅。

use bytes::{BufMut, BytesMut};
use spark_rpc_wire::{
    Fetch, FrameBuffer, FrameHeader, HEADER_SIZE, Message, RawMessage, Ticket, WireError,
    decode_frame, encode_frame,
};
use std::io::Cursor;

/// 测试用请求：1 字节操作码 + 8 字节参数。
struct OpRequest {
    opcode: u8,
    argument: u64,
}

impl Message for OpRequest {
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, WireError> {
        dst.put_u8(self.opcode);
        dst.put_u64(self.argument);
        Ok(9)
    }

    fn decode(&mut self, payload: &[u8]) -> Result<(), WireError> {
        if payload.len() != 9 {
            return Err(WireError::codec("op request expects 9 bytes"));
        }
        self.opcode = payload[0];
        self.argument = u64::from_be_bytes(payload[1..].try_into().expect("长度已校验"));
        Ok(())
    }
}

#[test]
fn header_is_big_endian_length_then_ticket() {
    let mut buffer = FrameBuffer::with_capacity(64);
    let ticket = Ticket::new(0x0102_0304_0506_0708).expect("非零");
    let total = encode_frame(ticket, &RawMessage::new(vec![0xaa, 0xbb]), &mut buffer)
        .expect("编码失败");

    assert_eq!(total, 14);
    assert_eq!(
        buffer.remaining(),
        &[
            0x00, 0x00, 0x00, 0x02, // length
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // ticket
            0xaa, 0xbb, // payload
        ]
    );
}

#[test]
fn empty_payload_is_header_only() {
    let mut buffer = FrameBuffer::with_capacity(HEADER_SIZE);
    encode_frame(Ticket::FIRST, &RawMessage::default(), &mut buffer).expect("编码失败");
    assert_eq!(
        buffer.remaining(),
        &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
        "容量恰为帧头时仍可发送空负载"
    );
}

#[test]
fn header_fields_parse_back() {
    let bytes = [0x00, 0x00, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0x30, 0x39];
    let header = FrameHeader::parse(&bytes).expect("帧头长度足够");
    assert_eq!(
        header,
        FrameHeader {
            length: 256,
            ticket: 12_345
        }
    );
}

#[test]
fn typed_request_survives_the_wire() {
    let mut buffer = FrameBuffer::with_capacity(512);
    let request = OpRequest {
        opcode: 1,
        argument: 0xdead_beef,
    };
    encode_frame(Ticket::FIRST, &request, &mut buffer).expect("编码失败");
    assert_eq!(buffer.remaining().len(), HEADER_SIZE + 9);
    assert_eq!(&buffer.remaining()[..4], &[0, 0, 0, 9]);

    let mut inbound = FrameBuffer::with_capacity(512);
    let fetch = decode_frame(&mut Cursor::new(buffer.remaining().to_vec()), &mut inbound)
        .expect("解码失败");
    assert_eq!(fetch, Fetch::Frame(Ticket::FIRST));

    let mut decoded = OpRequest {
        opcode: 0,
        argument: 0,
    };
    decoded.decode(inbound.remaining()).expect("负载解码失败");
    assert_eq!(decoded.opcode, 1);
    assert_eq!(decoded.argument, 0xdead_beef);
}
