use alloc::vec;
use alloc::vec::Vec;

use crate::{Result, error::CoreError, error::codes};

/// `ReadBuf` 是句柄下层的单块连续读缓冲。
///
/// # 设计背景（Why）
/// - 读路径的核心约定是"消费任意前缀"：上层一次可能只取走部分字节，
///   剩余后缀必须原位保留，等读使能恢复后重新投递；
/// - 单块固定容量换来零重分配与可预测的内存占用，容量为 0 表达"只写模式"。
///
/// # 契约说明（What）
/// - 不变量：`0 <= pos <= pos + len <= capacity`；
/// - `fill` 仅允许在缓冲为空时调用，由闭包一次性写入起始段；
/// - `consume` 截掉已消费前缀，耗尽时自动复位到起点。
#[derive(Debug)]
pub struct ReadBuf {
    data: Vec<u8>,
    pos: usize,
    len: usize,
}

impl ReadBuf {
    /// 以固定容量创建缓冲；容量 0 表示只写模式。
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            pos: 0,
            len: 0,
        }
    }

    /// 返回容量。
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 返回未消费字节数。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否没有未消费字节。
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 返回未消费的字节段。
    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..self.pos + self.len]
    }

    /// 在缓冲为空时由闭包填充数据，返回填充的字节数。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`is_empty()` 为真；容量为 0 时返回 `endpoint.not_ready`；
    /// - **后置条件**：成功后 `pos == 0` 且 `len` 等于闭包写入量。
    pub fn fill(&mut self, read: impl FnOnce(&mut [u8]) -> Result<usize>) -> Result<usize> {
        debug_assert!(self.is_empty(), "fill 只允许在缓冲耗尽后调用");
        if self.data.is_empty() {
            return Err(CoreError::new(
                codes::NOT_READY,
                "read attempted on a write-only buffer",
            ));
        }
        let count = read(&mut self.data)?;
        debug_assert!(count <= self.data.len());
        self.pos = 0;
        self.len = count;
        Ok(count)
    }

    /// 消费前缀 `count` 字节；超过剩余量时按剩余量截断。
    pub fn consume(&mut self, count: usize) {
        let taken = count.min(self.len);
        self.pos += taken;
        self.len -= taken;
        if self.len == 0 {
            self.pos = 0;
        }
    }

    /// 丢弃全部未消费字节。
    pub fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_consume_keeps_suffix() {
        let mut buf = ReadBuf::new(16);
        buf.fill(|dst| {
            dst[..5].copy_from_slice(b"hello");
            Ok(5)
        })
        .unwrap();
        assert_eq!(buf.unread(), b"hello");

        buf.consume(2);
        assert_eq!(buf.unread(), b"llo", "未消费后缀必须原位保留");

        buf.consume(3);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn write_only_buffer_rejects_fill() {
        let mut buf = ReadBuf::new(0);
        let err = buf.fill(|_| Ok(0)).unwrap_err();
        assert!(err.is_not_ready());
    }

    #[test]
    fn consume_past_end_saturates() {
        let mut buf = ReadBuf::new(4);
        buf.fill(|dst| {
            dst[..2].copy_from_slice(b"ab");
            Ok(2)
        })
        .unwrap();
        buf.consume(10);
        assert!(buf.is_empty());
    }
}
