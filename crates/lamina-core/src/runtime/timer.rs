use alloc::boxed::Box;
use core::time::Duration;

use crate::{Result, sealed::Sealed};

/// 定时器到期回调。
///
/// # 契约说明（What）
/// - `timeout` 在事件循环线程上调用；实现不得阻塞，不得在回调内同步等待
///   自身的 `stop_with_done` 完成（会自锁）。
pub trait TimerHandler: Send + Sync + 'static + Sealed {
    /// 定时器到期。
    fn timeout(&self);
}

/// 一次性定时器句柄。
///
/// # 设计背景（Why）
/// - 栈运行时只需要一次性定时器：握手重试、优雅关闭轮询、过滤器周期唤醒
///   都以"到期后由回调决定是否重启"的方式组合出周期行为。
/// - `stop_with_done` 是关键原语：停表方必须知道定时器是否正在触发中，
///   "先停后重启"的路径才能干净衔接（参见基础端点对过滤器定时器的管理）。
///
/// # 契约说明（What）
/// - `start`：启动一次性计时；定时器已在运行时返回 `endpoint.in_use`。
/// - `stop`：取消未触发的计时；定时器空闲时返回 `timer.not_running`。
/// - `stop_with_done`：同 `stop`，但保证 `done` 在任何在途到期回调完全退栈后
///   恰好执行一次；若定时器空闲则返回 `timer.not_running` 且不调用 `done`。
///
/// # 风险提示（Trade-offs）
/// - `done` 以 `Box<dyn FnOnce>` 传递，包含一次堆分配；该路径只出现在
///   关闭与重启流程，不在数据热路径上。
pub trait Timer: Send + Sync + 'static + Sealed {
    /// 启动一次性计时。
    fn start(&self, delay: Duration) -> Result<()>;

    /// 取消未触发的计时。
    fn stop(&self) -> Result<()>;

    /// 取消计时，并在任何在途到期回调退栈后调用 `done`。
    fn stop_with_done(&self, done: Box<dyn FnOnce() + Send>) -> Result<()>;
}
