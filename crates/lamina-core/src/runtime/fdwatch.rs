use core::fmt;

use crate::sealed::Sealed;

/// 操作系统句柄的轻量包装。
///
/// # 设计背景（Why）
/// - 核心 crate 保持 `no_std`，不能依赖 `std::os::fd::RawFd`；
///   以裸 `i32` 新类型承载句柄，既零开销又避免与普通整数混用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SysFd(pub i32);

impl fmt::Display for SysFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// 句柄注册后的监视标识。
///
/// # 契约说明（What）
/// - 由 [`super::OsFuncs::register_fd`] 分配，在对应 `clear_fd` 完成前唯一；
/// - 同一个底层句柄被先后注册两次会得到不同的 `FdId`，旧 id 的事件不会
///   串到新注册上。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FdId(pub u64);

/// 句柄监视的四个上行回调。
///
/// # 设计背景（Why）
/// - 读就绪 / 写就绪 / 异常就绪覆盖了连接建立与数据流的全部边沿；
///   `cleared` 则是安全析构的根基：只有当宿主确认不再有在途回调时，
///   句柄才允许被关闭。
///
/// # 契约说明（What）
/// - 所有回调都在事件循环线程上执行；
/// - `cleared` 在 `clear_fd(.., report = true)` 之后、且该句柄全部在途回调
///   退栈之后，恰好触发一次。
pub trait FdHandlers: Send + Sync + 'static + Sealed {
    /// 句柄可读。
    fn read_ready(&self);

    /// 句柄可写。
    fn write_ready(&self);

    /// 句柄出现异常条件（带外数据、连接失败等）。
    fn except_ready(&self);

    /// 监视已被清除，且不再有在途回调。
    fn cleared(&self);
}
