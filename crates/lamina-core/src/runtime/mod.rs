//! 运行时消费接口：栈核心向宿主事件循环索取的全部能力。
//!
//! # 模块定位（Why）
//! - 基础端点与句柄下层是纯状态机，本身不做任何系统调用；时钟、定时器、
//!   延迟执行、句柄监视与字节级读写全部经由 [`OsFuncs`] 注入。
//! - 这层窄接口换来两件事：核心在 `no_std + alloc` 下可测（确定性测试运行时
//!   见 `test_stubs`），生产环境则由 `adapters/` 下的事件循环适配器提供实现。
//!
//! # 核心组成（What）
//! - [`OsFuncs`]：聚合接口，按 `Arc<dyn OsFuncs>` 注入每个组件；
//! - [`Timer`] / [`TimerHandler`]：带 stop-with-done 的一次性定时器；
//! - [`DeferredRunner`] / [`RunnerHandler`]：打破重入的一等原语；
//! - [`FdHandlers`] / [`SysFd`] / [`FdId`]：句柄监视注册与四个上行回调。
//!
//! # 协作方式（How）
//! - 实现者必须保证全部上行回调串行发生在同一事件循环线程上；
//! - `clear_fd(.., report = true)` 之后，`cleared` 恰好触发一次，且发生在
//!   该句柄全部在途回调退栈之后 —— 这是句柄安全关闭的唯一依据。

mod fdwatch;
mod runner;
mod time;
mod timer;

pub use fdwatch::{FdHandlers, FdId, SysFd};
pub use runner::{DeferredRunner, RunnerHandler};
pub use time::MonotonicTimePoint;
pub use timer::{Timer, TimerHandler};

use alloc::sync::{Arc, Weak};

use crate::{Result, observability::Logger, sealed::Sealed};

/// `OsFuncs` 聚合宿主事件循环向栈核心暴露的能力。
///
/// # 设计背景（Why）
/// - 原型是"事件循环 + 锁 + 定时器 + 延迟执行 + 句柄监视"的最小闭包；
///   任何能提供这五件事的宿主（poll/epoll 线程、嵌入式主循环、测试桩）
///   都能承载整个栈。
///
/// # 契约说明（What）
/// - `now`：单调时钟读数；
/// - `alloc_timer` / `alloc_runner`：分配一次性定时器与延迟执行器；
/// - `register_fd` 及配套 enable/clear：句柄监视注册、按事件启停与清除；
/// - `fd_read` / `fd_write` / `fd_close`：字节级句柄操作，供句柄下层使用；
/// - `logger`：结构化日志出口。
///
/// # 前置/后置条件（Contract）
/// - **前置**：除 `now`/`logger` 外的方法可能在任意线程调用，实现必须线程安全；
/// - **后置**：所有上行回调（定时器到期、延迟执行、句柄事件）串行发生在
///   事件循环线程上，彼此不重叠。
///
/// # 风险提示（Trade-offs）
/// - 接口以对象安全为先，每次调用经过一次虚表分派；数据热路径上的批量
///   读写通过一次 `fd_read`/`fd_write` 摊薄该成本。
pub trait OsFuncs: Send + Sync + 'static + Sealed {
    /// 返回单调时钟读数。
    fn now(&self) -> MonotonicTimePoint;

    /// 分配一次性定时器。
    fn alloc_timer(&self, handler: Arc<dyn TimerHandler>) -> Result<Arc<dyn Timer>>;

    /// 分配延迟执行器。
    fn alloc_runner(&self, handler: Arc<dyn RunnerHandler>) -> Result<Arc<dyn DeferredRunner>>;

    /// 注册句柄监视，返回监视标识；初始所有事件均为禁用。
    fn register_fd(&self, fd: SysFd, handlers: Arc<dyn FdHandlers>) -> Result<FdId>;

    /// 启停读就绪回调。
    fn set_read_enabled(&self, id: FdId, enabled: bool);

    /// 启停写就绪回调。
    fn set_write_enabled(&self, id: FdId, enabled: bool);

    /// 启停异常就绪回调。
    fn set_except_enabled(&self, id: FdId, enabled: bool);

    /// 清除句柄监视。
    ///
    /// # 契约说明（What）
    /// - `report = true` 时，宿主必须在该句柄全部在途回调退栈后调用一次
    ///   [`FdHandlers::cleared`]；
    /// - `report = false` 为静默清除（用于 retry_open 换句柄与 disable 硬停），
    ///   不产生 `cleared` 回调。
    fn clear_fd(&self, id: FdId, report: bool);

    /// 从句柄读取字节。
    ///
    /// # 契约说明（What）
    /// - `Ok(0)` 表示暂无数据（虚假唤醒），对端关闭以 `endpoint.remote_closed`
    ///   错误表达，其余故障映射为 `transport.io`。
    fn fd_read(&self, fd: SysFd, buf: &mut [u8]) -> Result<usize>;

    /// 向句柄写入散布缓冲，返回实际写入的字节数。
    fn fd_write(&self, fd: SysFd, sg: &[&[u8]]) -> Result<usize>;

    /// 关闭句柄。调用前必须已完成 `clear_fd` 流程。
    fn fd_close(&self, fd: SysFd);

    /// 返回结构化日志出口。
    fn logger(&self) -> &dyn Logger;
}

/// 延迟绑定的弱引用单元。
///
/// # 设计背景（Why）
/// - 定时器与延迟执行器的回调需要指回宿主对象，而宿主对象构造时这些回调
///   已经先行分配，形成鸡生蛋问题；与其在构造函数里绕 `Arc::new_cyclic`
///   的错误传播限制，不如显式采用"构造完成后立即注册弱引用"的两段式。
/// - 弱引用保证回调不会延长宿主对象的生命周期，环状所有权被切断。
///
/// # 契约说明（What）
/// - `bind` 在对象构造完成后恰好调用一次；
/// - `get` 在绑定前返回 `None`，绑定后返回升级成功的强引用（对象仍存活时）。
pub struct WeakCell<T: ?Sized> {
    slot: spin::Mutex<Weak<T>>,
}

impl<T> WeakCell<T> {
    /// 创建未绑定的单元。
    pub fn new() -> Self {
        Self {
            slot: spin::Mutex::new(Weak::new()),
        }
    }
}

impl<T: ?Sized> WeakCell<T> {
    /// 绑定目标对象的弱引用。
    pub fn bind(&self, target: &Arc<T>) {
        *self.slot.lock() = Arc::downgrade(target);
    }

    /// 升级为强引用；目标已释放或尚未绑定时返回 `None`。
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().upgrade()
    }
}

impl<T> Default for WeakCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
