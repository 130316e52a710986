use alloc::collections::VecDeque;

use bytes::Bytes;

use crate::ll::Done;

/// 单条带外记录：数据、已发送偏移与可选的完成回调。
struct OobRecord {
    data: Bytes,
    pos: usize,
    done: Option<Done>,
}

/// 端点上挂载的带外发送队列。
///
/// # 设计背景（Why）
/// - 工具层需要在不与用户写竞争的情况下插入优先数据（如终端断线通告）；
///   队列在每次写就绪时机会性排水，带上 `"oob"` 标签走同一条线。
///
/// # 契约说明（What）
/// - 严格 FIFO；短写原位推进，记录发完时其 `done` 恰好触发一次；
/// - 队列排空后，普通的写就绪传播恢复。
pub(crate) struct OobQueue {
    records: VecDeque<OobRecord>,
}

impl OobQueue {
    pub(crate) fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    /// 入队一条记录。
    pub(crate) fn push(&mut self, data: Bytes, done: Option<Done>) {
        self.records.push_back(OobRecord { data, pos: 0, done });
    }

    /// 队列是否为空。
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 队首记录是否已部分发出（此时普通写必须让路，避免拆散记录）。
    pub(crate) fn head_partial(&self) -> bool {
        self.records.front().map(|r| r.pos > 0).unwrap_or(false)
    }

    /// 返回队首未发送部分的零拷贝切片。
    pub(crate) fn head_chunk(&self) -> Option<Bytes> {
        self.records.front().map(|r| r.data.slice(r.pos..))
    }

    /// 推进队首 `count` 字节；记录发完时弹出并返回其完成回调。
    pub(crate) fn advance(&mut self, count: usize) -> Option<Done> {
        let record = self.records.front_mut()?;
        record.pos = (record.pos + count).min(record.data.len());
        if record.pos == record.data.len() {
            let mut finished = self.records.pop_front().expect("front checked above");
            finished.done.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fifo_order_and_short_write_progress() {
        let mut queue = OobQueue::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        queue.push(
            Bytes::from_static(b"0123456789"),
            Some(Box::new(move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        queue.push(Bytes::from_static(b"tail"), None);

        assert_eq!(queue.head_chunk().unwrap().as_ref(), b"0123456789");
        assert!(queue.advance(4).is_none(), "短写不应提前触发 done");
        assert!(queue.head_partial());
        assert_eq!(queue.head_chunk().unwrap().as_ref(), b"456789");

        let done = queue.advance(6).expect("记录发完应返回 done");
        done();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(!queue.head_partial());
        assert_eq!(queue.head_chunk().unwrap().as_ref(), b"tail");
        assert!(queue.advance(4).is_none(), "无 done 的记录发完返回 None");
        assert!(queue.is_empty());
    }
}
