//! 内部 sealed 模块，控制对外契约的扩展边界。
//!
//! # 设计背景（Why）
//! - `lamina-core` 暴露多个可由外部实现的 Trait（过滤器、下层传输、运行时驱动），
//!   需要在 SemVer 框架下为这些契约保留增加默认方法的演进空间。
//! - 统一的 `Sealed` 标记让我们能够在不破坏公开 API 的情况下收紧或放宽实现许可。
//!
//! # 逻辑解析（How）
//! - 定义私有 Trait `Sealed` 并提供 blanket 实现；对外契约通过
//!   `: crate::sealed::Sealed` 间接引用该标记。
//! - 当前不限制实现者集合；若未来需要限制，只需收紧 blanket 条件。
//!
//! # 风险与考量（Trade-offs）
//! - Blanket 实现意味着任何类型都满足约束，这是为兼容外部传输驱动与过滤器生态；
//!   收紧条件属于破坏性变更，需配合兼容性公告。
pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
