use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use spark_rpc_wire::{Ticket, WireError};

use crate::ConfigError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    /// 稳定错误码，供日志与告警聚合。
    pub code: &'static str,
    /// 人类可读的操作名。
    pub message: &'static str,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.rpc.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.rpc.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.rpc.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.rpc.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.rpc.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.rpc.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "spark.rpc.tcp.shutdown_failed",
    message: "tcp shutdown",
};

/// 连接被关闭的原因，会随 [`RpcError::Closed`] 交给每一个未完成的请求。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// 本端调用了 `close`。
    LocalClose,
    /// 对端在帧边界处关闭了字节流。
    PeerClosed,
    /// 传输失败或协议违例，附带失败描述。
    Failed(Arc<str>),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LocalClose => f.write_str("closed locally"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// 端点、通道与监听器的统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方需要一眼区分“这一次请求失败，连接仍可用”与“连接已经不可用”，
///   前者可以直接重发，后者只能重建连接；
/// - **契约 (What)**：
///   - `Wire`（编码阶段）、`PoolExhausted`、`Timeout`、`MalformedRequest` 只影响当前调用；
///   - `Closed` 与 `Io` 意味着连接已关闭，所有在途请求同样以 `Closed` 失败；
///   - [`RpcError::is_connection_fatal`] 给出上述分类；
/// - **执行逻辑 (How)**：I/O 失败统一经由 `map_io_error` 附带操作标签，
///   与 [`OperationKind`] 常量表一一对应。
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// 帧或负载编解码失败。
    #[error(transparent)]
    Wire(#[from] WireError),

    /// 连接已关闭。
    #[error("connection {0}")]
    Closed(CloseReason),

    /// 底层套接字操作失败。
    #[error("{op} failed: {source}")]
    Io {
        /// 失败的操作。
        op: OperationKind,
        /// 原始 I/O 错误。
        #[source]
        source: io::Error,
    },

    /// 限时租借缓冲超时。
    #[error("no frame buffer became available within {waited:?}")]
    PoolExhausted {
        /// 实际等待的时长。
        waited: Duration,
    },

    /// 请求在期限内未收到响应，其待决记录已被撤回。
    #[error("request {ticket} timed out after {waited:?}")]
    Timeout {
        /// 超时请求的票据。
        ticket: Ticket,
        /// 实际等待的时长。
        waited: Duration,
    },

    /// 服务端收到的请求负载无法解码；票据仍可用于回复。
    #[error("request {ticket} carried a malformed payload: {source}")]
    MalformedRequest {
        /// 出错请求的票据。
        ticket: Ticket,
        /// 负载解码错误。
        #[source]
        source: WireError,
    },

    /// 配置非法。
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RpcError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Wire(_) => "spark.rpc.wire",
            RpcError::Closed(_) => "spark.rpc.tcp.closed",
            RpcError::Io { op, .. } => op.code,
            RpcError::PoolExhausted { .. } => "spark.rpc.tcp.pool_exhausted",
            RpcError::Timeout { .. } => "spark.rpc.tcp.timeout",
            RpcError::MalformedRequest { .. } => "spark.rpc.tcp.malformed_request",
            RpcError::Config(_) => "spark.rpc.config",
        }
    }

    /// 该错误之后连接是否已不可用。
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, RpcError::Closed(_) | RpcError::Io { .. })
    }
}

/// 将 IO 错误附带操作标签。
pub(crate) fn map_io_error(op: OperationKind, source: io::Error) -> RpcError {
    RpcError::Io { op, source }
}
