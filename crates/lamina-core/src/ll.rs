//! 下层传输契约：端点栈的底部边界。
//!
//! # 模块定位（Why）
//! - 每种传输（TCP/UDP/串口/子进程/内存管道）以同一形状插入栈底；
//!   基础端点只认本模块的契约，不认具体传输。
//! - 上行事件收敛为两个：携带缓冲或错误的"读"，以及"可写"。
//!   这是整个栈的数据泵所依赖的最小集合。

use alloc::{boxed::Box, string::String, sync::Arc};

use crate::{Result, aux::AuxTags, error::CoreError, sealed::Sealed};

/// 打开操作的同步结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenResult {
    /// 连接立即可用。
    Open,
    /// 连接异步完成，随后通过 done 回调收尾。
    InProgress,
}

/// 带错误位的完成回调，用于 `open`。
pub type DoneErr = Box<dyn FnOnce(Result<()>) + Send>;

/// 无参完成回调，用于 `close`。
pub type Done = Box<dyn FnOnce() + Send>;

/// 下层传输的上行事件接收方。
///
/// # 契约说明（What）
/// - `read`：投递一段数据或一个错误；返回值为本次消费的字节数，
///   允许消费任意前缀，未消费的后缀由下层保留并择机重投；
///   `err` 为 `Some` 时缓冲为空，返回值被忽略。
/// - `write_ready`：下层可再次受理写入。
///
/// # 前置/后置条件（Contract）
/// - 两个回调都发生在事件循环线程上，彼此不重叠；
/// - 读使能关闭后不会再有 `read` 回调（在途的一次除外）。
pub trait LlHandler: Send + Sync + 'static + Sealed {
    /// 投递读到的数据或错误，返回消费的字节数。
    fn read(&self, err: Option<CoreError>, buf: &[u8], aux: &AuxTags) -> usize;

    /// 下层可写。
    fn write_ready(&self);
}

/// 控制操作的数据载体，双向读写。
#[derive(Debug, Default)]
pub struct ControlData {
    /// 控制值；get 时由被调方写入，set 时由调用方填充。
    pub value: String,
}

/// `LowerLayer` 是传输驱动插入栈底的契约。
///
/// # 设计背景（Why）
/// - 状态机覆盖 `{closed, opening, open, closing}` 四态；打开与关闭都允许
///   异步完成，完成顺序由 done 回调显式表达而非轮询。
/// - 读写使能是电平语义：使能期间事件可以反复触发，下层负责在投递期间
///   自行禁用以避免重入。
///
/// # 契约说明（What）
/// - `open`：`Ok(Open)` 同步完成；`Ok(InProgress)` 异步完成并调用 `done`；
///   状态不允许时返回 `endpoint.not_ready`。
/// - `close`：只允许从 opening/open 发起；`done` 恰好调用一次，
///   并保证在全部在途上行回调退栈之后。
/// - `disable`：硬停 —— 立即切断事件并释放句柄，不做优雅排空，
///   之后任何回调（包括已登记的 done）都不会发生。
///
/// # 风险提示（Trade-offs）
/// - `write` 允许短写，调用方必须按返回值推进；
/// - `set_handler` 必须在第一次 `open` 之前完成，运行中更换接收方不受支持。
pub trait LowerLayer: Send + Sync + 'static + Sealed {
    /// 设置上行事件接收方。
    fn set_handler(&self, handler: Arc<dyn LlHandler>);

    /// 写入散布缓冲，返回实际接受的字节数。
    fn write(&self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize>;

    /// 打开传输。
    fn open(&self, done: DoneErr) -> Result<OpenResult>;

    /// 关闭传输；`done` 在句柄安全释放后恰好调用一次。
    fn close(&self, done: Done) -> Result<()>;

    /// 启停读回调。
    fn set_read_enabled(&self, enabled: bool);

    /// 启停写回调。
    fn set_write_enabled(&self, enabled: bool);

    /// 返回对端地址的字符串形式。
    fn remote_addr(&self) -> Result<String> {
        Err(CoreError::not_supported("remote address not available"))
    }

    /// 返回对端的数值标识（如子进程 pid）。
    fn remote_id(&self) -> Result<i32> {
        Err(CoreError::not_supported("remote id not available"))
    }

    /// 层内控制操作。
    fn control(&self, _get: bool, _option: u32, _data: &mut ControlData) -> Result<()> {
        Err(CoreError::not_supported("control not supported"))
    }

    /// 硬停：立即切断事件并释放句柄，不做优雅排空。
    fn disable(&self);
}
