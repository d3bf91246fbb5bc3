use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use crate::error::{self, map_io_error};
use crate::{RpcError, RpcGroup, ServerChannel, socket};

/// 对 `std::net::TcpListener` 的薄封装，接受的连接直接包装为 [`ServerChannel`]。
///
/// 只提供单次 `accept`；接受循环与按连接分配线程由调用方负责。
#[derive(Debug)]
pub struct RpcListener {
    inner: TcpListener,
    group: RpcGroup,
    local_addr: SocketAddr,
}

impl RpcListener {
    /// 以 `SO_REUSEADDR` 绑定到 `addr`。
    pub fn bind(group: &RpcGroup, addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        group.validate()?;
        let inner = socket::bind_listener(addr)?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        tracing::debug!(local = %local_addr, "rpc listener bound");
        Ok(Self {
            inner,
            group: group.clone(),
            local_addr,
        })
    }

    /// 阻塞直到接受一个连接。
    pub fn accept(&self) -> Result<ServerChannel, RpcError> {
        let (stream, peer) = self
            .inner
            .accept()
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        tracing::debug!(peer = %peer, "rpc connection accepted");
        ServerChannel::from_stream(&self.group, stream)
    }

    /// 实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
