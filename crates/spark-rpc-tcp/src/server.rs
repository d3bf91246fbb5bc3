use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use spark_rpc_wire::{Fetch, FrameBuffer, Message, Ticket, WireError, decode_frame, encode_frame};

use crate::error::{self, map_io_error};
use crate::{CloseReason, RpcError, RpcGroup, socket};

/// 服务端单连接的收发通道。
///
/// # 教案式说明
/// - **意图 (Why)**：服务端按连接分配线程，每条连接顺序地“收一帧、处理、回一帧”，
///   因此只需要一块帧缓冲，不需要缓冲池；
/// - **逻辑 (How)**：套接字保持阻塞模式，空闲的 [`ServerChannel::receive`] 在内核中等待；
///   [`ServerChannel::try_receive`] 只在首次读取时临时切换为非阻塞，供事件循环式调用方使用；
/// - **契约 (What)**：
///   - 请求负载解码失败返回 [`RpcError::MalformedRequest`]，其中的票据仍可用于回复错误响应；
///   - 对端在帧边界关闭返回 [`RpcError::Closed`]，携带 [`CloseReason::PeerClosed`]；
///   - 协议违例（帧过长、半帧、票据为 0）之后字节流不可再用，返回
///     [`RpcError::Closed`]（[`CloseReason::Failed`]），[`RpcError::is_connection_fatal`] 为真；
///   - [`ServerChannel::try_receive`] 恢复阻塞模式失败时不丢弃已解码的请求，
///     恢复推迟到下一次 `receive`/`transmit`。
pub struct ServerChannel {
    stream: TcpStream,
    buffer: FrameBuffer,
    nonblocking: bool,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl ServerChannel {
    /// 以已接受的连接构造通道。
    pub fn from_stream(group: &RpcGroup, stream: TcpStream) -> Result<Self, RpcError> {
        group.validate()?;
        socket::configure_stream(&stream, group, false)?;
        stream
            .set_nonblocking(false)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let (local_addr, remote_addr) = socket::addresses(&stream)?;
        Ok(Self {
            stream,
            buffer: FrameBuffer::with_capacity(group.message_size),
            nonblocking: false,
            local_addr,
            remote_addr,
        })
    }

    /// 阻塞直到收到一个请求，将负载解码进 `message`，返回其票据。
    pub fn receive<M>(&mut self, message: &mut M) -> Result<Ticket, RpcError>
    where
        M: Message + ?Sized,
    {
        self.ensure_blocking()?;
        loop {
            let fetched = decode_frame(&mut self.stream, &mut self.buffer);
            if let Some(ticket) = self.accept_fetch(fetched, message)? {
                return Ok(ticket);
            }
        }
    }

    /// 单次尝试：当前没有可读数据时返回 `Ok(None)`，不阻塞。
    ///
    /// 一旦读到帧的首字节，仍会读满整帧。
    pub fn try_receive<M>(&mut self, message: &mut M) -> Result<Option<Ticket>, RpcError>
    where
        M: Message + ?Sized,
    {
        self.set_nonblocking(true)?;
        let fetched = decode_frame(&mut self.stream, &mut self.buffer);
        let outcome = self.accept_fetch(fetched, message);
        if let Err(err) = self.set_nonblocking(false) {
            tracing::warn!(
                peer = %self.remote_addr,
                error = %err,
                "restoring blocking mode deferred to next call"
            );
        }
        outcome
    }

    /// 以票据 `ticket` 回复 `message`，直到整帧写出；返回帧长度。
    ///
    /// 编码失败以 [`RpcError::Wire`] 返回，通道仍可继续使用。
    pub fn transmit<M>(&mut self, ticket: Ticket, message: &M) -> Result<usize, RpcError>
    where
        M: Message + ?Sized,
    {
        self.ensure_blocking()?;
        let total = encode_frame(ticket, message, &mut self.buffer)?;
        self.stream
            .write_all(self.buffer.remaining())
            .map_err(|err| map_io_error(error::WRITE, err))?;
        self.buffer.clear();
        tracing::trace!(ticket = ticket.get(), len = total, "response transmitted");
        Ok(total)
    }

    /// 关闭连接。
    pub fn close(&mut self) -> Result<(), RpcError> {
        tracing::debug!(peer = %self.remote_addr, "server channel closed");
        socket::shutdown(&self.stream).map_err(|err| map_io_error(error::SHUTDOWN, err))
    }

    /// 对端地址。
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// 本端地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), RpcError> {
        self.stream
            .set_nonblocking(nonblocking)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        self.nonblocking = nonblocking;
        Ok(())
    }

    fn ensure_blocking(&mut self) -> Result<(), RpcError> {
        if self.nonblocking {
            self.set_nonblocking(false)?;
        }
        Ok(())
    }

    fn accept_fetch<M>(
        &self,
        fetched: Result<Fetch, WireError>,
        message: &mut M,
    ) -> Result<Option<Ticket>, RpcError>
    where
        M: Message + ?Sized,
    {
        match fetched {
            Ok(Fetch::Frame(ticket)) => {
                message
                    .decode(self.buffer.remaining())
                    .map_err(|source| RpcError::MalformedRequest { ticket, source })?;
                Ok(Some(ticket))
            }
            Ok(Fetch::Idle) => Ok(None),
            Ok(Fetch::Closed) => {
                tracing::debug!(peer = %self.remote_addr, "peer closed server channel");
                Err(RpcError::Closed(CloseReason::PeerClosed))
            }
            Err(WireError::Io(source)) => Err(map_io_error(error::READ, source)),
            Err(err) => {
                tracing::warn!(peer = %self.remote_addr, error = %err, "protocol violation on server channel");
                Err(RpcError::Closed(CloseReason::Failed(err.to_string().into())))
            }
        }
    }
}

impl fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerChannel")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("capacity", &self.buffer.capacity())
            .finish()
    }
}
