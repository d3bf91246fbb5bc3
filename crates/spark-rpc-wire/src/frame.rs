use bytes::BytesMut;

use crate::protocol::HEADER_SIZE;

/// 固定容量、可复用的帧缓冲。
///
/// # 设计动机（Why）
/// - 端点为每个在途请求租借一块缓冲，收发完成后归还；容量在构造时确定，
///   从而把单连接的内存占用限制在 `队列深度 × 消息大小` 之内；
/// - 写路径可能只发送出一部分字节，需要一个读游标记录“已经交给套接字的前缀”，
///   以便下一次写入从断点继续。
///
/// # 结构（How）
/// - `bytes`：底层 `BytesMut`，其长度即当前可读区间的终点；
/// - `capacity`：配置的固定容量，编码超限时会丢弃扩容后的内存并恢复到该容量；
/// - `cursor`：可读区间的起点。
///
/// # 契约（What）
/// - 编码完成后，可读区间为整帧（帧头 + 负载）；
/// - 解码完成后，可读区间恰好为负载；
/// - [`FrameBuffer::advance`] 只会在可读区间内移动，不会越界。
#[derive(Debug)]
pub struct FrameBuffer {
    bytes: BytesMut,
    capacity: usize,
    cursor: usize,
}

impl FrameBuffer {
    /// 创建指定容量的空缓冲。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// 配置的固定容量（帧头 + 负载上限）。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 单帧可承载的最大负载字节数。
    pub fn max_payload(&self) -> usize {
        self.capacity.saturating_sub(HEADER_SIZE)
    }

    /// 当前可读区间（尚未被消费的字节）。
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.cursor..]
    }

    /// 可读区间是否仍有字节。
    pub fn has_remaining(&self) -> bool {
        self.cursor < self.bytes.len()
    }

    /// 标记前 `count` 个可读字节已被消费，超出部分被截断到区间末尾。
    pub fn advance(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.bytes.len());
    }

    /// 清空内容与游标，保留容量。
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.cursor = 0;
    }

    /// 供编码路径追加字节的底层写入器。
    pub(crate) fn writer(&mut self) -> &mut BytesMut {
        &mut self.bytes
    }

    /// 重置为长度 `len` 的零填充区间，供读路径就地填充。
    pub(crate) fn fill_region(&mut self, len: usize) -> &mut [u8] {
        self.clear();
        self.bytes.resize(len, 0);
        &mut self.bytes[..]
    }

    /// 编码越界时 `BytesMut` 可能已自动扩容，这里换回一块配置容量的内存。
    pub(crate) fn restore_capacity(&mut self) {
        if self.bytes.capacity() > self.capacity {
            self.bytes = BytesMut::with_capacity(self.capacity);
        }
        self.clear();
    }
}
