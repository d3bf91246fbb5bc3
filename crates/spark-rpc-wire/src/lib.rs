#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]

//! `spark-rpc-wire` 定义 spark-rpc 的线上帧格式与消息编解码契约。
//!
//! # 模块定位（Why）
//! - 多个并发请求共享同一条 TCP 字节流时，唯一的关联依据是帧头中的票据（Ticket），
//!   因此帧格式必须字节级稳定，客户端与服务端才能互通；
//! - 本 crate 不持有任何连接或线程状态，只负责“消息对象 ↔ 帧字节”的转换，
//!   上层的缓冲池与多路复用引擎在其之上组合。
//!
//! # 帧格式（What）
//! ```text
//! offset 0..4    : 负载长度（u32，大端）
//! offset 4..12   : 票据（u64，大端，恒大于 0）
//! offset 12..    : 负载字节（对本层不透明）
//! ```
//!
//! # 结构安排（How）
//! - [`protocol`]：帧头常量、[`encode_frame`] 与 [`decode_frame`]；
//! - [`FrameBuffer`]：固定容量、带读游标的帧缓冲，在多次收发之间复用；
//! - [`Message`]：调用方实现的负载编解码契约，[`RawMessage`] 为不透明字节载体；
//! - [`Ticket`]/[`TicketSequencer`]：票据类型与单调递增的票据分配器；
//! - [`WireError`]：本层全部失败路径。

mod error;
mod frame;
mod message;
pub mod protocol;
mod ticket;

pub use error::WireError;
pub use frame::FrameBuffer;
pub use message::{Message, RawMessage};
pub use protocol::{Fetch, FrameHeader, HEADER_SIZE, decode_frame, encode_frame};
pub use ticket::{Ticket, TicketSequencer};
