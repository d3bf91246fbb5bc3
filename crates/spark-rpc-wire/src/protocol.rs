//! 帧编解码例程。
//!
//! # 教案级说明
//! - **Why**：读路径采用“先试探、再承诺阻塞”的形态：第一次读取若没有任何字节可读，立即返回
//!   [`Fetch::Idle`]，调用方可以据此轮询而不被挂起；一旦读到帧的第一个字节，就一直读到整帧完整，
//!   保证字节流不会停在帧中间。
//! - **How**：[`encode_frame`] 先预留帧头，再让消息追加负载，最后回填长度与票据；
//!   [`decode_frame`] 先读满 [`HEADER_SIZE`] 字节，校验长度与票据后再读满负载。
//! - **What**：所有整数均为网络字节序（大端），见 crate 级文档中的帧格式。

use std::io::{self, Read};
use std::thread;

use bytes::{Buf, BufMut};

use crate::{FrameBuffer, Message, Ticket, WireError};

/// 帧头长度：4 字节负载长度 + 8 字节票据。
pub const HEADER_SIZE: usize = 12;

/// 帧头字段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// 负载长度（不含帧头）。
    pub length: u32,
    /// 票据原始值；合法帧中恒大于 0。
    pub ticket: u64,
}

impl FrameHeader {
    /// 以大端序写入 `dst` 的前 [`HEADER_SIZE`] 字节。
    ///
    /// # Panics
    ///
    /// `dst` 短于 [`HEADER_SIZE`] 时 panic。
    pub fn write_to(&self, dst: &mut [u8]) {
        let mut cursor = &mut dst[..HEADER_SIZE];
        cursor.put_u32(self.length);
        cursor.put_u64(self.ticket);
    }

    /// 从 `src` 的前 [`HEADER_SIZE`] 字节解析帧头。
    pub fn parse(src: &[u8]) -> Result<Self, WireError> {
        if src.len() < HEADER_SIZE {
            return Err(WireError::TruncatedFrame {
                received: src.len(),
                expected: HEADER_SIZE,
            });
        }
        let mut cursor = &src[..HEADER_SIZE];
        Ok(Self {
            length: cursor.get_u32(),
            ticket: cursor.get_u64(),
        })
    }
}

/// 一次读取尝试的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fetch {
    /// 读到一整帧，缓冲的可读区间为其负载。
    Frame(Ticket),
    /// 当前没有可读字节，未发生阻塞。
    Idle,
    /// 对端已关闭字节流，且没有残留的半帧。
    Closed,
}

/// 将 `message` 编码为票据为 `ticket` 的完整帧，返回帧总长度。
///
/// # 契约说明
/// - **后置条件**：成功时 `buffer` 的可读区间为 `[帧头][负载]`；
/// - **错误**：
///   - 消息声明的长度与实际追加的字节数不一致 → [`WireError::SizeMismatch`]；
///   - 帧总长超过缓冲容量 → [`WireError::FrameTooLarge`]；
///   - 失败时缓冲被清空并恢复为配置容量，可直接复用。
pub fn encode_frame<M>(
    ticket: Ticket,
    message: &M,
    buffer: &mut FrameBuffer,
) -> Result<usize, WireError>
where
    M: Message + ?Sized,
{
    buffer.clear();
    buffer.writer().put_bytes(0, HEADER_SIZE);

    let declared = match message.encode(buffer.writer()) {
        Ok(declared) => declared,
        Err(err) => {
            buffer.restore_capacity();
            return Err(err);
        }
    };

    let written = buffer.remaining().len();
    let produced = written.saturating_sub(HEADER_SIZE);
    if written < HEADER_SIZE || declared != produced {
        buffer.restore_capacity();
        return Err(WireError::SizeMismatch { declared, produced });
    }

    let required = HEADER_SIZE + produced;
    let capacity = buffer.capacity();
    let length = match u32::try_from(produced) {
        Ok(length) if required <= capacity => length,
        _ => {
            buffer.restore_capacity();
            return Err(WireError::FrameTooLarge { required, capacity });
        }
    };

    FrameHeader {
        length,
        ticket: ticket.get(),
    }
    .write_to(&mut buffer.writer()[..HEADER_SIZE]);
    Ok(required)
}

/// 从 `stream` 读取一帧到 `buffer`。
///
/// # 契约说明
/// - 第一次读取返回 `WouldBlock`/`TimedOut`/`Interrupted` 时立即返回 [`Fetch::Idle`]；
/// - 第一次读取返回 0 字节时返回 [`Fetch::Closed`]；
/// - 此后持续重试直到整帧到齐，`WouldBlock` 时让出线程；
/// - 帧中途遇到 EOF → [`WireError::TruncatedFrame`]；负载超过
///   [`FrameBuffer::max_payload`] → [`WireError::FrameTooLarge`]，此时负载字节不会被读取；
///   票据为 0 → [`WireError::InvalidTicket`]。这三类错误之后字节流已失去同步。
pub fn decode_frame<R>(stream: &mut R, buffer: &mut FrameBuffer) -> Result<Fetch, WireError>
where
    R: Read + ?Sized,
{
    let header = buffer.fill_region(HEADER_SIZE);
    let first = match stream.read(header) {
        Ok(0) => {
            buffer.clear();
            return Ok(Fetch::Closed);
        }
        Ok(read) => read,
        Err(err) if is_transient(&err) => {
            buffer.clear();
            return Ok(Fetch::Idle);
        }
        Err(err) => {
            buffer.clear();
            return Err(err.into());
        }
    };
    read_exact_from(stream, header, first)?;
    let parsed = FrameHeader::parse(header)?;

    let length = parsed.length as usize;
    if length > buffer.max_payload() {
        let capacity = buffer.capacity();
        buffer.clear();
        return Err(WireError::FrameTooLarge {
            required: HEADER_SIZE + length,
            capacity,
        });
    }
    let Some(ticket) = Ticket::new(parsed.ticket) else {
        buffer.clear();
        return Err(WireError::InvalidTicket);
    };

    let payload = buffer.fill_region(length);
    read_exact_from(stream, payload, 0)?;
    tracing::trace!(ticket = ticket.get(), len = length, "frame decoded");
    Ok(Fetch::Frame(ticket))
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// 从 `filled` 处继续读满 `dst`。
fn read_exact_from<R>(stream: &mut R, dst: &mut [u8], mut filled: usize) -> Result<(), WireError>
where
    R: Read + ?Sized,
{
    while filled < dst.len() {
        match stream.read(&mut dst[filled..]) {
            Ok(0) => {
                return Err(WireError::TruncatedFrame {
                    received: filled,
                    expected: dst.len(),
                });
            }
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if is_transient(&err) => thread::yield_now(),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
