use std::borrow::Cow;
use std::io;

/// 帧编解码过程中的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“仅影响单次调用”的序列化错误与“破坏字节流同步”的协议错误，
///   上层据此决定是把错误交还调用方，还是关闭整条连接；
/// - **契约 (What)**：
///   - `SizeMismatch`、`Codec` 以及编码阶段的 `FrameTooLarge` 只影响当前消息；
///   - 解码阶段的 `FrameTooLarge`、`TruncatedFrame`、`InvalidTicket` 与 `Io` 意味着字节流已不可信；
/// - **执行逻辑 (How)**：`Io` 通过 `#[from]` 承接底层 `std::io::Error`，其余变体由协议层显式构造。
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// 消息声明的负载长度与实际写入的字节数不一致。
    #[error("message declared {declared} payload bytes but produced {produced}")]
    SizeMismatch {
        /// `Message::encode` 返回的长度。
        declared: usize,
        /// 缓冲中实际追加的字节数。
        produced: usize,
    },

    /// 帧（含帧头）超过缓冲容量。
    #[error("frame of {required} bytes exceeds buffer capacity of {capacity} bytes")]
    FrameTooLarge {
        /// 帧头加负载所需的字节数。
        required: usize,
        /// 缓冲的固定容量。
        capacity: usize,
    },

    /// 对端在一帧中途关闭了连接。
    #[error("stream closed after {received} of {expected} frame bytes")]
    TruncatedFrame {
        /// 已读取的字节数。
        received: usize,
        /// 当前阶段（帧头或负载）期望的字节数。
        expected: usize,
    },

    /// 帧头携带了保留值 0 作为票据。
    #[error("frame header carries reserved ticket 0")]
    InvalidTicket,

    /// 调用方的消息编解码失败。
    #[error("message codec failure: {detail}")]
    Codec {
        /// 人类可读的失败描述。
        detail: Cow<'static, str>,
    },

    /// 底层字节流读写失败。
    #[error("stream i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// 构造消息编解码错误，供 [`Message`](crate::Message) 实现者使用。
    pub fn codec(detail: impl Into<Cow<'static, str>>) -> Self {
        WireError::Codec {
            detail: detail.into(),
        }
    }
}
