#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]

//! `spark-rpc-buffer` 为多路复用端点提供固定深度的帧缓冲池。
//!
//! # 模块定位（Why）
//! - 单条连接上同时在途的请求数由缓冲池深度决定：池耗尽时新请求阻塞等待，
//!   这就是端点唯一的背压机制；
//! - 所有缓冲在构造时一次性分配，收发热路径上不再触发堆分配。
//!
//! # 设计概要（How）
//! - [`FramePool`] 以 `parking_lot::Mutex<Vec<FrameBuffer>>` 作为自由链表，
//!   以 `Condvar` 唤醒阻塞在 [`FramePool::acquire`] 上的线程；
//! - [`PooledFrame`] 是租约对象，`Drop` 时把缓冲放回池中，调用方无需显式归还，
//!   也无法归还一块不属于本池的缓冲。

mod pool;

pub use pool::{FramePool, PoolStats, PooledFrame};
