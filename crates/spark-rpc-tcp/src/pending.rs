use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use spark_rpc_wire::Ticket;

use crate::completion::Completion;
use crate::{CloseReason, RpcError};

/// 单个端点的待决请求表：票据 → 完成信号。
///
/// 条目在帧发出前登记，由解码出对应响应的线程（或超时、关闭路径）恰好移除一次。
pub(crate) struct PendingTable<Resp> {
    entries: DashMap<Ticket, Arc<Completion<Resp>>>,
}

impl<Resp> PendingTable<Resp> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
        }
    }

    /// 登记；票据已存在时保留原条目并返回 `false`。
    pub(crate) fn register(&self, completion: Arc<Completion<Resp>>) -> bool {
        match self.entries.entry(completion.ticket()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(completion);
                true
            }
        }
    }

    /// 移除并返回票据对应的条目。
    pub(crate) fn take(&self, ticket: Ticket) -> Option<Arc<Completion<Resp>>> {
        self.entries.remove(&ticket).map(|(_, completion)| completion)
    }

    /// 以 `reason` 失败所有条目，返回实际被失败的数量。
    pub(crate) fn fail_all(&self, reason: &CloseReason) -> usize {
        let tickets: Vec<Ticket> = self.entries.iter().map(|entry| *entry.key()).collect();
        tickets
            .into_iter()
            .filter_map(|ticket| self.take(ticket))
            .filter(|completion| completion.fail(RpcError::Closed(reason.clone())))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
