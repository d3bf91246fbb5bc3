use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// 关联一次请求与其响应的票据。
///
/// 票据恒大于 0；0 在帧头中属于保留值，解码时会被拒绝。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(NonZeroU64);

impl Ticket {
    /// 首个票据值。
    pub const FIRST: Ticket = Ticket(NonZeroU64::MIN);

    /// 从原始值构造票据，0 返回 `None`。
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(value) => Some(Ticket(value)),
            None => None,
        }
    }

    /// 原始数值。
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Ticket> for u64 {
    fn from(ticket: Ticket) -> Self {
        ticket.get()
    }
}

/// 单个端点内单调递增的票据分配器。
///
/// # 教案式说明
/// - **意图 (Why)**：多个线程并发发起请求时，每个请求都必须拿到互不相同、且严格大于
///   此前所有票据的值；
/// - **逻辑 (How)**：内部计数器从 0 开始，原子递增保证任意两次调用观察到不同的旧值，
///   票据取 `1 + 旧值`；
/// - **契约 (What)**：分配器归属于单个端点实例，不存在进程级共享状态；
/// - **注意事项 (Trade-offs)**：`u64` 票据空间在单条连接的生命周期内不可能耗尽；
///   若真的耗尽，[`TicketSequencer::next`] 直接 panic，而不是回绕或重复发放票据。
#[derive(Debug, Default)]
pub struct TicketSequencer {
    issued: AtomicU64,
}

impl TicketSequencer {
    /// 创建从 [`Ticket::FIRST`] 开始分配的分配器。
    pub const fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
        }
    }

    /// 分配下一个票据。
    ///
    /// # Panics
    /// 已发放 `u64::MAX` 个票据后再次调用。
    pub fn next(&self) -> Ticket {
        // 计数器停在 `u64::MAX`，不会回绕到已发放过的值。
        match self
            .issued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |issued| issued.checked_add(1))
        {
            Ok(offset) => Ticket(NonZeroU64::MIN.saturating_add(offset)),
            Err(_) => panic!("ticket space exhausted"),
        }
    }

    /// 已分配的票据数量。
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
