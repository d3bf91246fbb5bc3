//! 套接字选项与监听套接字的构造。

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::RpcGroup;
use crate::error::{self, RpcError, map_io_error};

/// 监听队列长度。
const LISTEN_BACKLOG: i32 = 1024;

/// 按组配置设置已建立连接的套接字选项。
///
/// 客户端端点额外开启 `SO_REUSEADDR`，便于短时间内以同一本地地址重连。
pub(crate) fn configure_stream(
    stream: &TcpStream,
    group: &RpcGroup,
    reuse_address: bool,
) -> Result<(), RpcError> {
    stream
        .set_nodelay(group.nodelay)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    if reuse_address {
        SockRef::from(stream)
            .set_reuse_address(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    }
    Ok(())
}

/// 连接两端的地址。
pub(crate) fn addresses(stream: &TcpStream) -> Result<(SocketAddr, SocketAddr), RpcError> {
    let local = stream
        .local_addr()
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    let remote = stream
        .peer_addr()
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    Ok((local, remote))
}

/// 双向关闭；对端先行断开导致的 `NotConnected` 视为成功。
pub(crate) fn shutdown(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
        _ => Ok(()),
    }
}

/// 以 `SO_REUSEADDR` 绑定并开始监听。
pub(crate) fn bind_listener(addr: impl ToSocketAddrs) -> Result<TcpListener, RpcError> {
    let addr = addr
        .to_socket_addrs()
        .map_err(|err| map_io_error(error::BIND, err))?
        .next()
        .ok_or_else(|| {
            map_io_error(
                error::BIND,
                io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"),
            )
        })?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| map_io_error(error::BIND, err))?;
    socket
        .set_reuse_address(true)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    socket
        .bind(&addr.into())
        .map_err(|err| map_io_error(error::BIND, err))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|err| map_io_error(error::BIND, err))?;
    Ok(socket.into())
}
