use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use spark_rpc_wire::FrameBuffer;

/// 固定深度、固定帧容量的缓冲池。
///
/// # 模块角色（Why）
/// - 为每个端点限定同时在途的帧数量，池深度即并发上限；
/// - 租借阻塞即背压：第 `depth + 1` 个调用者会一直等待，直到有租约被释放。
///
/// # 核心机制（How）
/// - 构造时预分配 `depth` 块容量为 `frame_capacity` 的 [`FrameBuffer`]；
/// - 自由链表为 `parking_lot::Mutex<Vec<_>>`，出栈为空时在 `Condvar` 上等待；
/// - [`PooledFrame`] 在 `Drop` 中清空缓冲、归还链表并 `notify_one`。
///
/// # 契约说明（What）
/// - **线程安全**：`FramePool` 可克隆，克隆体共享同一组缓冲；
/// - **不变量**：空闲数 + 在租数恒等于 `depth`，池永远不会被超额归还；
/// - **后置条件**：租到的缓冲可读区间为空，容量等于 `frame_capacity`。
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// 创建深度为 `depth`、每块容量为 `frame_capacity` 的池。
    pub fn new(depth: usize, frame_capacity: usize) -> Self {
        let free = (0..depth)
            .map(|_| FrameBuffer::with_capacity(frame_capacity))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                returned: Condvar::new(),
                depth,
                frame_capacity,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// 池深度。
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// 每块缓冲的容量。
    pub fn frame_capacity(&self) -> usize {
        self.inner.frame_capacity
    }

    /// 当前空闲的缓冲数量。
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// 非阻塞租借；池已耗尽时返回 `None`。
    pub fn try_acquire(&self) -> Option<PooledFrame> {
        let buffer = self.inner.free.lock().pop();
        match buffer {
            Some(buffer) => Some(self.lease(buffer)),
            None => {
                self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 阻塞租借，直到有缓冲被归还。
    pub fn acquire(&self) -> PooledFrame {
        let mut free = self.inner.free.lock();
        if free.is_empty() {
            self.inner.metrics.waits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(depth = self.inner.depth, "frame pool exhausted, waiting");
        }
        loop {
            if let Some(buffer) = free.pop() {
                drop(free);
                return self.lease(buffer);
            }
            self.inner.returned.wait(&mut free);
        }
    }

    /// 至多等待 `timeout` 的租借；超时返回 `None`。
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledFrame> {
        let deadline = Instant::now() + timeout;
        let mut free = self.inner.free.lock();
        if free.is_empty() {
            self.inner.metrics.waits.fetch_add(1, Ordering::Relaxed);
        }
        loop {
            if let Some(buffer) = free.pop() {
                drop(free);
                return Some(self.lease(buffer));
            }
            if self
                .inner
                .returned
                .wait_until(&mut free, deadline)
                .timed_out()
            {
                let last_chance = free.pop();
                drop(free);
                return match last_chance {
                    Some(buffer) => Some(self.lease(buffer)),
                    None => {
                        self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                };
            }
        }
    }

    /// 当前统计快照。
    pub fn statistics(&self) -> PoolStats {
        let available = self.available();
        PoolStats {
            depth: self.inner.depth,
            available,
            leased: self.inner.depth.saturating_sub(available),
            misses: self.inner.metrics.misses.load(Ordering::Relaxed),
            waits: self.inner.metrics.waits.load(Ordering::Relaxed),
        }
    }

    fn lease(&self, buffer: FrameBuffer) -> PooledFrame {
        PooledFrame {
            buffer,
            pool: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("depth", &self.inner.depth)
            .field("frame_capacity", &self.inner.frame_capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// 缓冲池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 池深度。
    pub depth: usize,
    /// 空闲缓冲数。
    pub available: usize,
    /// 在租缓冲数。
    pub leased: usize,
    /// 非阻塞租借或限时租借落空的次数。
    pub misses: u64,
    /// 阻塞租借进入等待的次数。
    pub waits: u64,
}

/// 池内缓冲的租约，`Drop` 时自动归还。
///
/// 通过 `Deref`/`DerefMut` 直接当作 [`FrameBuffer`] 使用。
pub struct PooledFrame {
    buffer: FrameBuffer,
    pool: Arc<PoolInner>,
}

impl Deref for PooledFrame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }
}

impl fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledFrame")
            .field("capacity", &self.buffer.capacity())
            .field("remaining", &self.buffer.remaining().len())
            .finish()
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        // 容量为 0 的占位缓冲不会分配内存。
        let mut buffer = mem::replace(&mut self.buffer, FrameBuffer::with_capacity(0));
        buffer.clear();
        self.pool.free.lock().push(buffer);
        self.pool.returned.notify_one();
    }
}

struct PoolInner {
    free: Mutex<Vec<FrameBuffer>>,
    returned: Condvar,
    depth: usize,
    frame_capacity: usize,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct PoolMetrics {
    misses: AtomicU64,
    waits: AtomicU64,
}
