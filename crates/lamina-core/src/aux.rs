use alloc::{borrow::Cow, vec::Vec};

/// 带外数据的公认标签。
pub const OOB_TAG: &str = "oob";

/// `AuxTags` 是随读写一同传递的字符串标签列表。
///
/// # 设计背景（Why）
/// - 读写事件之外常有少量元信息要携带（优先级、逐事件标志）；用一组短字符串
///   表达，避免为每种过滤器扩展一次结构体字段。
/// - 公认标签 `"oob"` 标记带外流量：它与普通数据走同一条线，但在发送队列中
///   单独记账。
///
/// # 契约说明（What）
/// - 标签集合无序去重不做强制，消费方按"包含与否"判定；
/// - 空集合不分配。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuxTags {
    tags: Vec<Cow<'static, str>>,
}

impl AuxTags {
    /// 创建空标签集。
    pub const fn empty() -> Self {
        Self { tags: Vec::new() }
    }

    /// 创建仅含 `"oob"` 标签的集合。
    pub fn oob() -> Self {
        let mut tags = Self::empty();
        tags.push(OOB_TAG);
        tags
    }

    /// 追加一个标签。
    pub fn push(&mut self, tag: impl Into<Cow<'static, str>>) {
        self.tags.push(tag.into());
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// 是否包含指定标签。
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    /// 是否标记为带外数据。
    pub fn is_oob(&self) -> bool {
        self.contains(OOB_TAG)
    }

    /// 遍历标签。
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|tag| tag.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oob_tag_round_trip() {
        let tags = AuxTags::oob();
        assert!(tags.is_oob());
        assert!(tags.contains("oob"));
        assert!(!AuxTags::empty().is_oob());
    }
}
