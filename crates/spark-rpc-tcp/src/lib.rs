#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]

//! `spark-rpc-tcp` 在一条 TCP 连接上多路复用并发的请求/响应交换。
//!
//! # 设计动机（Why）
//! - 每对端点只维持一条连接，任意数量的线程通过 [`RpcEndpoint`] 并发发起请求，
//!   响应按帧头中的票据分发回发起者，可以乱序到达；
//! - 服务端每条连接一个 [`ServerChannel`]，顺序地收请求、回响应。
//!
//! # 核心契约（What）
//! - 帧格式与消息契约见 `spark-rpc-wire`；
//! - 同时在途的请求数受 [`RpcGroup::queue_depth`] 约束，超出时发起者阻塞（背压）；
//! - 连接关闭或出错时，所有尚未完成的 [`ResponseFuture`] 立即以 [`RpcError::Closed`] 失败；
//!   不做重连与重试。
//!
//! # 实现策略（How）
//! - 写路径：`spin::Mutex` 自旋串行化，帧之间不交织；
//! - 读路径：`spin::Mutex::try_lock` 机会式读取，没有专门的读线程；
//! - 待决表：`dashmap::DashMap<Ticket, Arc<Completion>>`；
//! - 完成信号：原子标志 + `parking_lot` 互斥锁与条件变量。
//!
//! # 风险与考量（Trade-offs）
//! - 没有读线程意味着响应只在有线程调用 [`ResponseFuture::wait`] 或
//!   [`RpcEndpoint::poll_response`] 时才会被读取；
//! - 写锁持有期间写者会推进读路径，单帧写出时间受对端读取速度影响。

mod completion;
mod config;
mod endpoint;
mod error;
mod listener;
mod pending;
mod server;
mod socket;

pub use completion::ResponseFuture;
pub use config::{
    ConfigError, DEFAULT_MESSAGE_SIZE, DEFAULT_POLL_INTERVAL_US, DEFAULT_QUEUE_DEPTH, RpcGroup,
};
pub use endpoint::{PollOutcome, RpcEndpoint};
pub use error::{CloseReason, OperationKind, RpcError};
pub use listener::RpcListener;
pub use server::ServerChannel;
pub use spark_rpc_wire::{Message, RawMessage, Ticket, WireError};
