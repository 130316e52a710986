use crate::{Result, sealed::Sealed};

/// 延迟执行器的回调。
pub trait RunnerHandler: Send + Sync + 'static + Sealed {
    /// 在事件循环线程上执行一次被调度的工作。
    fn run(&self);
}

/// `DeferredRunner` 是打破重入的一等原语。
///
/// # 设计背景（Why）
/// - 端点在持锁上下文中产生的用户可见通知（缓冲数据投递、open/close 完成）
///   必须等当前调用栈退净后再执行，否则用户回调会与内部状态机重入纠缠；
/// - 它因此与定时器、句柄监视同级，是宿主事件循环必须提供的能力。
///
/// # 契约说明（What）
/// - `schedule`：请求在事件循环线程上执行一次回调；即使从事件循环线程
///   自身调用，也必须推迟到当前栈退净之后。
/// - 已调度未执行期间重复调用是幂等的（合并为一次执行）。
/// - 运行时关停后返回 `runtime.shutdown`。
pub trait DeferredRunner: Send + Sync + 'static + Sealed {
    /// 调度一次延迟执行；挂起期间幂等。
    fn schedule(&self) -> Result<()>;
}
