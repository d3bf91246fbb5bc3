use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use spark_rpc_wire::{Message, Ticket};

use crate::RpcError;
use crate::endpoint::{PollOutcome, Shared};

/// 单个请求的一次性完成信号。
///
/// # 教案式说明
/// - **意图 (Why)**：响应可能由任意线程解码，而等待者是发起请求的线程；
///   信号必须恰好触发一次，且等待者醒来时一定能看到完整写入的响应；
/// - **逻辑 (How)**：
///   - `signaled` 以 CAS 从 `false` 置为 `true`，只有赢得 CAS 的一方可以写入槽位；
///   - 槽位由 `parking_lot::Mutex` 保护，写入后 `notify_all`，互斥锁的释放/获取保证可见性；
///   - 等待者总是以槽位状态为准，而非 `signaled` 标志，避免在写入完成前提前返回；
/// - **契约 (What)**：`complete` 与 `fail` 返回是否由本次调用完成了信号，
///   第二次调用是无副作用的 `false`。
pub(crate) struct Completion<Resp> {
    ticket: Ticket,
    signaled: AtomicBool,
    slot: Mutex<Slot<Resp>>,
    ready: Condvar,
}

enum Slot<Resp> {
    Pending(Resp),
    Ready(Result<Resp, RpcError>),
    Claimed,
}

impl<Resp> Completion<Resp> {
    pub(crate) fn new(ticket: Ticket, response: Resp) -> Self {
        Self {
            ticket,
            signaled: AtomicBool::new(false),
            slot: Mutex::new(Slot::Pending(response)),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub(crate) fn is_done(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// 用 `payload` 填充响应并发出信号。
    pub(crate) fn complete(&self, payload: &[u8]) -> bool
    where
        Resp: Message,
    {
        self.settle(|response| match response {
            Some(mut response) => response
                .decode(payload)
                .map(|()| response)
                .map_err(RpcError::from),
            None => Err(RpcError::Wire(spark_rpc_wire::WireError::codec(
                "response slot already settled",
            ))),
        })
    }

    /// 以错误结束该请求。
    pub(crate) fn fail(&self, error: RpcError) -> bool {
        self.settle(|_| Err(error))
    }

    fn settle<F>(&self, outcome: F) -> bool
    where
        F: FnOnce(Option<Resp>) -> Result<Resp, RpcError>,
    {
        if self
            .signaled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut slot = self.slot.lock();
        let response = match mem::replace(&mut *slot, Slot::Claimed) {
            Slot::Pending(response) => Some(response),
            _ => None,
        };
        *slot = Slot::Ready(outcome(response));
        self.ready.notify_all();
        true
    }

    /// 取走结果；尚未完成时返回 `None`。
    pub(crate) fn take(&self) -> Option<Result<Resp, RpcError>> {
        let mut slot = self.slot.lock();
        match mem::replace(&mut *slot, Slot::Claimed) {
            Slot::Ready(outcome) => Some(outcome),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// 在结果就绪前最多休眠 `timeout`。
    pub(crate) fn park(&self, timeout: Duration) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending(_)) {
            let _ = self.ready.wait_for(&mut slot, timeout);
        }
    }
}

/// [`RpcEndpoint::issue_request`](crate::RpcEndpoint::issue_request) 返回的完成句柄。
///
/// 端点没有专门的读线程：等待者在 [`ResponseFuture::wait`] 中自行调用
/// [`RpcEndpoint::poll_response`](crate::RpcEndpoint::poll_response) 推进读路径，
/// 无法推进时在句柄的条件变量上休眠 [`RpcGroup::poll_interval`](crate::RpcGroup::poll_interval)，
/// 其它线程投递了本请求的响应会立即唤醒它。
///
/// 未等待完成就丢弃句柄会撤回其待决记录，迟到的响应随后被丢弃。
pub struct ResponseFuture<Req, Resp> {
    request: Req,
    completion: Arc<Completion<Resp>>,
    shared: Arc<Shared<Resp>>,
}

impl<Req, Resp> ResponseFuture<Req, Resp>
where
    Resp: Message,
{
    pub(crate) fn new(
        request: Req,
        completion: Arc<Completion<Resp>>,
        shared: Arc<Shared<Resp>>,
    ) -> Self {
        Self {
            request,
            completion,
            shared,
        }
    }

    /// 请求的票据。
    pub fn ticket(&self) -> Ticket {
        self.completion.ticket()
    }

    /// 原始请求。
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// 响应是否已到达（或请求已失败）。
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// 阻塞直到响应到达，返回被填充的响应对象。
    ///
    /// 连接关闭时返回 [`RpcError::Closed`]；响应负载解码失败时返回 [`RpcError::Wire`]，
    /// 连接仍可继续使用。
    pub fn wait(self) -> Result<Resp, RpcError> {
        self.wait_until(None)
    }

    /// 至多等待 `timeout`；超时后撤回待决记录并返回 [`RpcError::Timeout`]。
    pub fn wait_timeout(self, timeout: Duration) -> Result<Resp, RpcError> {
        self.wait_until(Some(timeout))
    }

    fn wait_until(self, timeout: Option<Duration>) -> Result<Resp, RpcError> {
        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);
        let ticket = self.ticket();
        let interval = self.shared.group().poll_interval();
        loop {
            if let Some(outcome) = self.completion.take() {
                return outcome;
            }
            match self.shared.poll_response() {
                Ok(PollOutcome::Delivered(_) | PollOutcome::Discarded(_)) => continue,
                Ok(PollOutcome::Idle | PollOutcome::Contended) => {}
                Err(err) => {
                    if self.shared.pending().take(ticket).is_some() {
                        self.completion.fail(err);
                    }
                }
            }

            let mut nap = interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    if self.shared.pending().take(ticket).is_some() {
                        tracing::debug!(ticket = ticket.get(), "request timed out, entry withdrawn");
                        self.completion.fail(RpcError::Timeout {
                            ticket,
                            waited: now.duration_since(started),
                        });
                    }
                    // 未能撤回说明另一线程正在投递响应，继续等待其完成。
                    continue;
                }
                nap = nap.min(deadline - now);
            }
            self.completion.park(nap);
        }
    }
}

impl<Req, Resp> Drop for ResponseFuture<Req, Resp> {
    fn drop(&mut self) {
        if !self.completion.is_done() {
            let ticket = self.completion.ticket();
            if self.shared.pending().take(ticket).is_some() {
                tracing::trace!(ticket = ticket.get(), "unfinished response handle dropped");
            }
        }
    }
}

impl<Req, Resp> fmt::Debug for ResponseFuture<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("ticket", &self.completion.ticket())
            .field("done", &self.completion.is_done())
            .finish()
    }
}
