use bytes::{BufMut, Bytes, BytesMut};

use crate::WireError;

/// 请求与响应负载的编解码契约，由上层业务实现。
///
/// # 教案式说明
/// - **意图 (Why)**：传输层只关心“帧里有多少字节、属于哪个票据”，
///   负载语义完全由业务决定；该 trait 是两者之间唯一的接缝；
/// - **逻辑 (How)**：
///   - `encode` 在帧头之后追加负载，返回声明的负载长度；协议层会核对声明值与
///     实际追加的字节数，二者不符即视为序列化错误；
///   - `decode` 收到的切片恰好是一帧的负载，不含帧头；
/// - **契约 (What)**：
///   - **前置条件**：`encode` 只能追加，不得改写或截断 `dst` 中已有的字节；
///   - **后置条件**：传输层不会在单次调用之外保留对消息的引用；
/// - **注意事项 (Trade-offs)**：`dst` 为可增长的 `BytesMut`，超出缓冲容量的帧由协议层
///   在编码后拒绝，而不是在写入过程中截断。
pub trait Message {
    /// 将自身序列化到 `dst` 末尾，返回负载字节数。
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, WireError>;

    /// 用 `payload` 的内容就地填充自身。
    fn decode(&mut self, payload: &[u8]) -> Result<(), WireError>;
}

/// 不透明的原始字节消息，负载即内容本身。
///
/// 适用于业务层已自行完成序列化、只需要传输层搬运字节的场景，也用于基准与模糊测试。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    payload: Bytes,
}

impl RawMessage {
    /// 以给定负载构造消息。
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// 负载字节。
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 取出负载。
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl Message for RawMessage {
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, WireError> {
        dst.put_slice(&self.payload);
        Ok(self.payload.len())
    }

    fn decode(&mut self, payload: &[u8]) -> Result<(), WireError> {
        self.payload = Bytes::copy_from_slice(payload);
        Ok(())
    }
}
