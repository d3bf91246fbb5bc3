//! 端点与通道的静态配置。
//!
//! # 教案级说明
//! - **Why**：队列深度与消息大小决定了单连接的内存上限与并发上限，必须在建连时一次性确定，
//!   运行期间不再变化；
//! - **How**：[`RpcGroup`] 支持 `serde` 反序列化（缺省字段取默认值）与 `with_*` 构建式设置，
//!   构造端点、通道、监听器前统一调用 [`RpcGroup::validate`]；
//! - **What**：所有字段均为纯数据，克隆开销可忽略。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spark_rpc_wire::HEADER_SIZE;

/// 默认缓冲池深度（单连接最大在途请求数）。
pub const DEFAULT_QUEUE_DEPTH: usize = 16;
/// 默认帧容量（帧头 + 负载）。
pub const DEFAULT_MESSAGE_SIZE: usize = 512;
/// 默认轮询间隔（微秒）。
pub const DEFAULT_POLL_INTERVAL_US: u64 = 50;

/// 一组端点共享的配置。
///
/// ```toml
/// queue_depth = 32
/// message_size = 1024
/// nodelay = true
/// acquire_timeout_ms = 200
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcGroup {
    /// 缓冲池深度，即同一端点上同时在途的请求上限。
    pub queue_depth: usize,
    /// 每块缓冲的容量，限制单帧（含 12 字节帧头）的最大长度。
    pub message_size: usize,
    /// 是否关闭 Nagle 算法。
    pub nodelay: bool,
    /// 发起请求时租借缓冲的最长等待；`None` 表示一直等待。
    pub acquire_timeout_ms: Option<u64>,
    /// 等待响应的线程在无进展时的休眠间隔（微秒）。
    pub poll_interval_us: u64,
}

impl Default for RpcGroup {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            message_size: DEFAULT_MESSAGE_SIZE,
            nodelay: false,
            acquire_timeout_ms: None,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
        }
    }
}

impl RpcGroup {
    /// 默认配置。
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let group: RpcGroup = toml::from_str(source)?;
        group.validate()?;
        Ok(group)
    }

    /// 设置缓冲池深度。
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// 设置帧容量。
    pub fn with_message_size(mut self, message_size: usize) -> Self {
        self.message_size = message_size;
        self
    }

    /// 设置 `TCP_NODELAY`。
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置租借缓冲的最长等待。
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout_ms = timeout.map(saturating_millis);
        self
    }

    /// 设置无进展时的休眠间隔。
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self
    }

    /// 租借缓冲的最长等待。
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// 无进展时的休眠间隔。
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// 单帧可承载的最大负载。
    pub fn max_payload(&self) -> usize {
        self.message_size.saturating_sub(HEADER_SIZE)
    }

    /// 校验配置是否可用于构造端点。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.message_size < HEADER_SIZE {
            return Err(ConfigError::MessageSizeTooSmall {
                size: self.message_size,
                minimum: HEADER_SIZE,
            });
        }
        if u32::try_from(self.max_payload()).is_err() {
            return Err(ConfigError::MessageSizeTooLarge {
                size: self.message_size,
            });
        }
        if self.poll_interval_us == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}

fn saturating_millis(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

/// 配置解析或校验失败。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 队列深度为 0，端点将无法发出任何请求。
    #[error("queue_depth must be at least 1")]
    ZeroQueueDepth,

    /// 帧容量放不下帧头。
    #[error("message_size {size} is smaller than the {minimum}-byte frame header")]
    MessageSizeTooSmall {
        /// 配置值。
        size: usize,
        /// 最小允许值。
        minimum: usize,
    },

    /// 负载上限无法用 32 位长度字段表示。
    #[error("message_size {size} exceeds the 32-bit frame length field")]
    MessageSizeTooLarge {
        /// 配置值。
        size: usize,
    },

    /// 轮询间隔为 0 会让等待线程空转。
    #[error("poll_interval_us must be at least 1")]
    ZeroPollInterval,

    /// TOML 文本无法解析。
    #[error("invalid rpc group configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
