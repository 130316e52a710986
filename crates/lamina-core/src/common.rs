use core::fmt;

/// `Error` 是 `lamina-core` 在 `no_std + alloc` 轨道上的错误对象抽象。
///
/// # 设计背景（Why）
/// - 核心契约不能依赖 `std::error::Error`，但错误链（根因回溯）在排障时不可或缺；
///   该 Trait 提供与标准库等价的最小能力。
///
/// # 契约说明（What）
/// - `source` 返回底层原因；没有底层原因时返回 `None`。
/// - 实现类型必须同时满足 `Debug + Display`，保证日志与面向人的输出均可用。
pub trait Error: fmt::Debug + fmt::Display {
    /// 返回底层原因，构成错误链。
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

/// 标准库互操作：任何 `std` 侧错误都可以装入 [`crate::error::CoreError`] 的原因链，
/// 只要它实现了本 Trait。此处为常见叶子类型提供直接实现。
impl Error for fmt::Error {}

impl Error for alloc::string::String {}

impl Error for &'static str {}

/// `Result` 别名，统一核心契约的返回形态。
///
/// # 契约说明（What）
/// - 与 `core::result::Result` 完全同构，仅为书写便利而存在；
///   错误位默认使用 [`crate::error::CoreError`]。
pub type Result<T, E = crate::error::CoreError> = core::result::Result<T, E>;
