use criterion::{Criterion, black_box};
use spark_rpc_wire::{FrameBuffer, RawMessage, Ticket, TicketSequencer, decode_frame, encode_frame};
use std::{env, io::Cursor, time::Duration};

/// 帧编解码基准：衡量默认 512 字节缓冲下单帧编码与解码的成本。
///
/// # 设计背景（Why）
/// - 每次请求都会经过一次编码与一次解码，两者处于多路复用引擎的热路径上；
/// - 缓冲复用是本协议的核心优化，基准中同一块缓冲反复使用，检测是否引入了额外分配。
fn bench_encode(c: &mut Criterion) {
    let sequencer = TicketSequencer::new();
    let message = RawMessage::new(vec![0x42; 256]);
    let mut buffer = FrameBuffer::with_capacity(512);
    c.bench_function("encode_frame_256b", |b| {
        b.iter(|| {
            let total = encode_frame(sequencer.next(), &message, &mut buffer).unwrap();
            black_box(total)
        });
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut outbound = FrameBuffer::with_capacity(512);
    encode_frame(Ticket::FIRST, &RawMessage::new(vec![0x42; 256]), &mut outbound).unwrap();
    let frame = outbound.remaining().to_vec();
    let mut inbound = FrameBuffer::with_capacity(512);
    c.bench_function("decode_frame_256b", |b| {
        b.iter(|| {
            let fetch = decode_frame(&mut Cursor::new(frame.as_slice()), &mut inbound).unwrap();
            black_box(fetch)
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_encode(&mut criterion);
    bench_decode(&mut criterion);
    criterion.final_summary();
}
