//! 过滤器契约：端点栈中的协议层。
//!
//! # 模块定位（Why）
//! - 过滤器是夹在用户与传输之间的有状态翻译器：上行字节流（用户侧）与
//!   下行字节流（传输侧）在这里互相转换（TLS 记录、消息分帧、多路复用……）。
//! - 契约刻意保持同步非阻塞：过滤器从不直接做 I/O，所有进度都由基础端点
//!   的数据泵驱动；异步性通过四个就绪谓词与重试三态表达。
//!
//! # 核心组成（What）
//! - [`Filter`]：十余个操作，一方法一职责（而非单函数 + 操作码分派）；
//! - [`ProgressOutcome`]：`try_connect`/`try_disconnect` 的重试三态；
//! - [`UlSink`] / [`LlSink`]：两个方向的数据出口，由基础端点在调用时注入；
//! - [`FilterCtl`]：过滤器反向请求基础端点动作的唯一通道。

use alloc::{boxed::Box, sync::Arc};
use core::time::Duration;

use crate::{
    Result,
    aux::AuxTags,
    endpoint::{Endpoint, EndpointHandler},
    error::CoreError,
    ll::ControlData,
    sealed::Sealed,
};

/// 握手推进的三态结果。
///
/// # 契约说明（What）
/// - `Complete`：本方向的协商已完成；
/// - `RetryOnIo`：发生任何 I/O 后重试；
/// - `RetryOnIoOrTimer(d)`：发生 I/O 或 `d` 时长的定时器到期后重试，
///   截止时长由过滤器给出。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// 协商完成。
    Complete,
    /// 任何 I/O 后重试。
    RetryOnIo,
    /// I/O 或定时器到期后重试。
    RetryOnIoOrTimer(Duration),
}

/// 面向用户方向的数据出口（解码后的字节向上投递）。
///
/// # 契约说明（What）
/// - 返回实际消费的字节数；返回值小于 `buf.len()` 表示上方背压，
///   过滤器必须把未消费部分留在内部缓冲，等待下一次排水。
pub trait UlSink {
    /// 向上投递解码数据，返回消费的字节数。
    fn deliver(&mut self, buf: &[u8], aux: &AuxTags) -> Result<usize>;
}

/// 面向传输方向的数据出口（编码后的字节向下写出）。
pub trait LlSink {
    /// 向下写出编码数据，返回写出的字节数。
    fn write(&mut self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize>;
}

/// 过滤器反向请求基础端点动作的回调句柄。
///
/// # 设计背景（Why）
/// - 过滤器可能异步地产生待发数据（如 TLS 重协商）或需要周期唤醒；
///   它不能直接操纵端点状态机，只能通过 `setup` 时拿到的这一个句柄发信号。
pub trait FilterCtl: Send + Sync + 'static + Sealed {
    /// 有异步产生的输出，要求基础端点重算使能。
    fn output_ready(&self);

    /// 请求在 `delay` 后获得一次 [`Filter::timeout`] 回调。
    fn start_timer(&self, delay: Duration);
}

/// `Filter` 是可插拔协议层的契约。
///
/// # 设计背景（Why）
/// - 每个操作同步、非阻塞，调用全部来自基础端点；过滤器以内部缓冲 +
///   就绪谓词表达自身进度，数据泵据此编排上下两个方向的搬运。
///
/// # 契约说明（What）
/// - `ul_write`：从顶部收用户字节；`sg` 为空表示"把内部缓冲向下排水"；
/// - `ll_write`：从底部收传输字节；`buf` 为空表示"把内部缓冲向上排水"；
/// - 谓词三件套（`ul_read_pending` / `ll_write_pending` / `ll_read_needed`）
///   必须与内部缓冲严格一致，否则数据泵会停摆或空转；
/// - `check_open_done` 是握手成功后的最后一道闸（证书校验等），
///   失败会中止整个打开流程；
/// - `setup` 在打开流程起点调用并交付 [`FilterCtl`]；`cleanup` 在关闭
///   流程末尾复位内部状态，同一个过滤器可被再次打开。
///
/// # 风险提示（Trade-offs）
/// - 实现必须 `Send + Sync` 并以内部锁保护自身状态：写路径可能来自用户
///   线程，数据泵则在事件循环线程上运行。
pub trait Filter: Send + Sync + 'static + Sealed {
    /// 推进连接方向的协商。
    fn try_connect(&self) -> Result<ProgressOutcome>;

    /// 推进断开方向的协商（如 TLS close-notify 的收发）。
    fn try_disconnect(&self) -> Result<ProgressOutcome>;

    /// 从顶部收用户字节；`sg` 为空表示向下排水。返回消费的用户字节数。
    fn ul_write(&self, sg: &[&[u8]], aux: &AuxTags, sink: &mut dyn LlSink) -> Result<usize>;

    /// 从底部收传输字节；`buf` 为空表示向上排水。返回消费的传输字节数。
    fn ll_write(&self, buf: &[u8], aux: &AuxTags, sink: &mut dyn UlSink) -> Result<usize>;

    /// 是否有解码完成的数据等待用户读取。
    fn ul_read_pending(&self) -> bool;

    /// 是否有编码完成的数据等待写入传输。
    fn ll_write_pending(&self) -> bool;

    /// 是否需要传输侧供给更多输入。
    fn ll_read_needed(&self) -> bool;

    /// 握手成功后的最后一道闸；失败中止打开。
    fn check_open_done(&self) -> Result<()> {
        Ok(())
    }

    /// 基础端点代为维护的定时器到期。
    fn timeout(&self) {}

    /// 打开流程起点：配置内部状态并接收反向回调句柄。
    fn setup(&self, _ctl: Arc<dyn FilterCtl>) -> Result<()> {
        Ok(())
    }

    /// 关闭流程末尾：复位内部状态，允许再次打开。
    fn cleanup(&self) {}

    /// 层内控制操作。
    fn control(&self, _get: bool, _option: u32, _data: &mut ControlData) -> Result<()> {
        Err(CoreError::not_supported("control not supported"))
    }

    /// 在既有连接上派生子通道（多路复用类过滤器实现）。
    fn open_channel(
        &self,
        _args: &[&str],
        _handler: Arc<dyn EndpointHandler>,
        _done: Box<dyn FnOnce(Result<()>) + Send>,
    ) -> Result<Endpoint> {
        Err(CoreError::not_supported("channels not supported"))
    }
}
