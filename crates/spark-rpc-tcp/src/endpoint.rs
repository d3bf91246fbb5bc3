//! 客户端多路复用端点。
//!
//! # 教案级说明
//! - **Why**：任意数量的线程共享同一条连接发起请求；响应乱序到达，按票据分发回各自的发起者。
//!   端点不启动读线程，读路径由等待响应的线程或空闲线程机会式推进；
//! - **How**：
//!   - 写路径由 `spin::Mutex` 串行化，加锁即自旋，一次只写一帧，帧之间不会交织；
//!   - 读路径的 `spin::Mutex` 只用 `try_lock`，抢不到就立即返回 [`PollOutcome::Contended`]；
//!   - 写不完（部分写入或 `WouldBlock`）时，写者在持有写锁的情况下推进读路径，
//!     避免双方都在等对端读取而互相卡死；
//! - **What**：任何传输失败都会关闭端点，并以 [`RpcError::Closed`] 立即失败所有在途请求。

use std::fmt;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use spark_rpc_buffer::{FramePool, PooledFrame};
use spark_rpc_wire::{Fetch, FrameBuffer, Message, Ticket, TicketSequencer, decode_frame, encode_frame};

use crate::completion::{Completion, ResponseFuture};
use crate::error::{self, map_io_error};
use crate::pending::PendingTable;
use crate::{CloseReason, RpcError, RpcGroup, socket};

/// 一次 [`RpcEndpoint::poll_response`] 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// 读到一帧，并交给了对应票据的等待者。
    Delivered(Ticket),
    /// 读到一帧，但票据没有待决请求（例如已超时撤回），响应被丢弃。
    Discarded(Ticket),
    /// 连接上暂时没有可读数据。
    Idle,
    /// 另一线程正在读，或缓冲池暂无空闲缓冲。
    Contended,
}

/// 单连接上的多路复用 RPC 客户端。
///
/// `RpcEndpoint` 可克隆，克隆体共享同一连接、缓冲池与待决表，可分发到任意线程。
///
/// ```no_run
/// use spark_rpc_tcp::{RawMessage, RpcEndpoint, RpcGroup};
///
/// # fn main() -> Result<(), spark_rpc_tcp::RpcError> {
/// let group = RpcGroup::new().with_nodelay(true);
/// let endpoint: RpcEndpoint<RawMessage, RawMessage> = RpcEndpoint::connect(&group, "127.0.0.1:7000")?;
/// let handle = endpoint.issue_request(RawMessage::new(&b"ping"[..]), RawMessage::default())?;
/// let response = handle.wait()?;
/// println!("{} bytes", response.payload().len());
/// # Ok(())
/// # }
/// ```
pub struct RpcEndpoint<Req, Resp> {
    shared: Arc<Shared<Resp>>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Resp> Clone for RpcEndpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _request: PhantomData,
        }
    }
}

impl<Req, Resp> RpcEndpoint<Req, Resp>
where
    Req: Message,
    Resp: Message,
{
    /// 建立到 `addr` 的连接。
    pub fn connect(group: &RpcGroup, addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        group.validate()?;
        let stream = TcpStream::connect(addr).map_err(|err| map_io_error(error::CONNECT, err))?;
        Self::from_stream(group, stream)
    }

    /// 以已建立的连接构造端点；套接字会被切换为非阻塞模式。
    pub fn from_stream(group: &RpcGroup, stream: TcpStream) -> Result<Self, RpcError> {
        group.validate()?;
        socket::configure_stream(&stream, group, true)?;
        stream
            .set_nonblocking(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let (local_addr, remote_addr) = socket::addresses(&stream)?;
        tracing::debug!(peer = %remote_addr, local = %local_addr, depth = group.queue_depth, "rpc endpoint connected");

        Ok(Self {
            shared: Arc::new(Shared {
                stream,
                pool: FramePool::new(group.queue_depth, group.message_size),
                pending: PendingTable::new(group.queue_depth),
                sequencer: TicketSequencer::new(),
                write_guard: spin::Mutex::new(()),
                read_guard: spin::Mutex::new(()),
                closed: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                group: group.clone(),
                local_addr,
                remote_addr,
            }),
            _request: PhantomData,
        })
    }

    /// 编码并发出请求，返回完成句柄。
    ///
    /// # 契约说明
    /// - 缓冲池耗尽时阻塞，直到有缓冲归还；配置了 `acquire_timeout_ms` 时超时返回
    ///   [`RpcError::PoolExhausted`]；
    /// - 编码失败以 [`RpcError::Wire`] 返回，连接不受影响；
    /// - 写入失败会关闭端点并失败所有在途请求。
    pub fn issue_request(
        &self,
        request: Req,
        response: Resp,
    ) -> Result<ResponseFuture<Req, Resp>, RpcError> {
        let shared = &self.shared;
        shared.ensure_open()?;
        let mut frame = shared.lease_frame()?;
        let ticket = shared.sequencer.next();
        encode_frame(ticket, &request, &mut frame)?;

        let completion = Arc::new(Completion::new(ticket, response));
        let registered = shared.pending.register(Arc::clone(&completion));
        debug_assert!(registered, "ticket {ticket} issued twice");
        if shared.is_closed() {
            shared.pending.take(ticket);
            return Err(shared.closed_error());
        }

        shared.transmit(&mut frame)?;
        drop(frame);
        tracing::trace!(ticket = ticket.get(), "request issued");
        Ok(ResponseFuture::new(request, completion, Arc::clone(shared)))
    }

    /// 机会式推进读路径：至多读取并分发一帧，从不阻塞在锁或空闲连接上。
    pub fn poll_response(&self) -> Result<PollOutcome, RpcError> {
        self.shared.poll_response()
    }
}

impl<Req, Resp> RpcEndpoint<Req, Resp> {
    /// 关闭连接，所有在途请求以 [`CloseReason::LocalClose`] 失败。重复调用无副作用。
    pub fn close(&self) -> Result<(), RpcError> {
        match self.shared.shutdown(CloseReason::LocalClose) {
            Some(Err(err)) => Err(map_io_error(error::SHUTDOWN, err)),
            _ => Ok(()),
        }
    }

    /// 对端地址。
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// 本端地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// 尚未收到响应的请求数。
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// 端点是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// 端点使用的配置。
    pub fn group(&self) -> &RpcGroup {
        &self.shared.group
    }
}

impl<Req, Resp> fmt::Debug for RpcEndpoint<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("remote_addr", &self.shared.remote_addr)
            .field("local_addr", &self.shared.local_addr)
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

/// 端点各克隆体与完成句柄共享的状态。
pub(crate) struct Shared<Resp> {
    stream: TcpStream,
    pool: FramePool,
    pending: PendingTable<Resp>,
    sequencer: TicketSequencer,
    write_guard: spin::Mutex<()>,
    read_guard: spin::Mutex<()>,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    group: RpcGroup,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl<Resp> Shared<Resp> {
    pub(crate) fn group(&self) -> &RpcGroup {
        &self.group
    }

    pub(crate) fn pending(&self) -> &PendingTable<Resp> {
        &self.pending
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), RpcError> {
        if self.is_closed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn closed_error(&self) -> RpcError {
        let reason = self
            .close_reason
            .lock()
            .clone()
            .unwrap_or(CloseReason::LocalClose);
        RpcError::Closed(reason)
    }

    fn lease_frame(&self) -> Result<PooledFrame, RpcError> {
        match self.group.acquire_timeout() {
            None => Ok(self.pool.acquire()),
            Some(timeout) => {
                let started = Instant::now();
                self.pool
                    .acquire_timeout(timeout)
                    .ok_or_else(|| RpcError::PoolExhausted {
                        waited: started.elapsed(),
                    })
            }
        }
    }

    /// 关闭端点并失败所有待决请求；已关闭时返回 `None`。
    fn shutdown(&self, reason: CloseReason) -> Option<io::Result<()>> {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                return None;
            }
            *slot = Some(reason.clone());
        }
        self.closed.store(true, Ordering::SeqCst);
        let outcome = socket::shutdown(&self.stream);

        let failed = self.pending.fail_all(&reason);
        match &reason {
            CloseReason::Failed(detail) => {
                tracing::warn!(peer = %self.remote_addr, reason = %detail, failed, "rpc endpoint broken");
            }
            _ => {
                tracing::debug!(peer = %self.remote_addr, reason = %reason, failed, "rpc endpoint closed");
            }
        }
        if !self.pending.is_empty() {
            // 关闭后仍可能有条目在途：登记方会在看到关闭标志后自行撤回。
            tracing::trace!(remaining = self.pending.len(), "pending entries racing with close");
        }
        Some(outcome)
    }

    fn fail(&self, reason: CloseReason) -> RpcError {
        self.shutdown(reason);
        self.closed_error()
    }
}

impl<Resp> Shared<Resp>
where
    Resp: Message,
{
    /// 在写锁内写出整帧；写不完时推进读路径后重试。
    fn transmit(&self, frame: &mut FrameBuffer) -> Result<(), RpcError> {
        let _writer = self.write_guard.lock();
        let mut stream = &self.stream;
        while frame.has_remaining() {
            match stream.write(frame.remaining()) {
                Ok(0) => {
                    let err = io::Error::from(io::ErrorKind::WriteZero);
                    self.shutdown(CloseReason::Failed(err.to_string().into()));
                    return Err(map_io_error(error::WRITE, err));
                }
                Ok(written) => frame.advance(written),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    self.shutdown(CloseReason::Failed(err.to_string().into()));
                    return Err(map_io_error(error::WRITE, err));
                }
            }
            if frame.has_remaining() {
                match self.poll_response()? {
                    PollOutcome::Idle | PollOutcome::Contended => thread::yield_now(),
                    PollOutcome::Delivered(_) | PollOutcome::Discarded(_) => {}
                }
            }
        }
        Ok(())
    }

    pub(crate) fn poll_response(&self) -> Result<PollOutcome, RpcError> {
        self.ensure_open()?;
        let Some(mut frame) = self.pool.try_acquire() else {
            return Ok(PollOutcome::Contended);
        };
        let fetched = {
            let Some(_reader) = self.read_guard.try_lock() else {
                return Ok(PollOutcome::Contended);
            };
            let mut stream = &self.stream;
            decode_frame(&mut stream, &mut frame)
        };

        match fetched {
            Ok(Fetch::Frame(ticket)) => Ok(self.dispatch(ticket, &frame)),
            Ok(Fetch::Idle) => Ok(PollOutcome::Idle),
            Ok(Fetch::Closed) => Err(self.fail(CloseReason::PeerClosed)),
            Err(err) => Err(self.fail(CloseReason::Failed(err.to_string().into()))),
        }
    }

    fn dispatch(&self, ticket: Ticket, frame: &FrameBuffer) -> PollOutcome {
        match self.pending.take(ticket) {
            Some(completion) => {
                completion.complete(frame.remaining());
                tracing::trace!(ticket = ticket.get(), len = frame.remaining().len(), "response delivered");
                PollOutcome::Delivered(ticket)
            }
            None => {
                tracing::warn!(
                    ticket = ticket.get(),
                    peer = %self.remote_addr,
                    "response for unknown ticket discarded"
                );
                PollOutcome::Discarded(ticket)
            }
        }
    }
}
