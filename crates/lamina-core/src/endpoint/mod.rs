//! 端点：用户可见的组合 I/O 句柄。
//!
//! # 模块定位（Why）
//! - 应用拿到的是一个不透明句柄 [`Endpoint`]：一次打开/关闭/读/写的单位。
//!   内部恰好拥有一个下层传输与至多一个过滤器；更深的叠层经
//!   [`crate::bridge::EndpointLl`] 以"端点当下层"的方式获得。
//! - 事件通过 [`EndpointHandler`] 回调送达：数据读、可写、新子通道，
//!   全部发生在事件循环线程上。

mod base;
mod oob;

use alloc::{string::String, sync::Arc};
use bytes::Bytes;
use core::time::Duration;

use crate::{
    Result,
    aux::AuxTags,
    error::CoreError,
    filter::Filter,
    ll::{ControlData, Done, DoneErr, LowerLayer},
    runtime::OsFuncs,
    sealed::Sealed,
};

pub(crate) use base::Base;

/// 端点事件回调。
///
/// # 契约说明（What）
/// - `read`：投递一段数据或一个错误（`err` 为 `Some` 时缓冲为空）；
///   返回消费的字节数，允许消费任意前缀，未消费部分稍后重投；
/// - `write_ready`：端点可再次受理写；
/// - `new_channel`：多路复用类过滤器派生出新的子通道；
/// - `user_event`：过滤器上浮的领域事件（流控、认证请求等）。
///
/// # 前置/后置条件（Contract）
/// - 所有回调都在事件循环线程上执行，且端点内部锁此刻必然未持有，
///   回调里可以安全地调用端点的任何方法；
/// - 回调执行期间端点的读挡闸放下（不会嵌套投递）。
pub trait EndpointHandler: Send + Sync + 'static + Sealed {
    /// 投递数据或错误，返回消费的字节数。
    fn read(&self, err: Option<&CoreError>, buf: &[u8], aux: &AuxTags) -> usize;

    /// 端点可写。
    fn write_ready(&self);

    /// 新的子通道建立。
    fn new_channel(&self, _channel: Endpoint) -> Result<()> {
        Err(CoreError::not_supported("channels not accepted"))
    }

    /// 过滤器上浮的领域事件。
    fn user_event(&self, _id: u32, _data: &mut ControlData) -> Result<()> {
        Err(CoreError::not_supported("event not handled"))
    }
}

/// 端点构造配置。
///
/// # 契约说明（What）
/// - `handshake_timeout`：打开流程的总截止时间；过滤器可以给出更短的
///   单步重试间隔，但整体不会超过该上限。`None` 表示不设上限。
#[derive(Clone, Copy, Debug)]
pub struct EndpointConfig {
    pub handshake_timeout: Option<Duration>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl EndpointConfig {
    /// 设置（或清除）握手总截止时间。
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// `Endpoint` 是用户持有的端点句柄。
///
/// # 生命周期（What）
/// - 句柄可克隆共享；最后一个用户句柄释放时，仍然打开的端点被隐式关闭；
/// - 生命周期：分配 → closed →（请求打开）opening → open →（请求关闭）
///   closing → closed；同一时刻至多一个在途打开与一个在途关闭。
pub struct Endpoint {
    base: Arc<Base>,
}

impl Endpoint {
    /// 组装客户端端点：一个下层传输，至多一个过滤器。
    pub fn alloc(
        os: Arc<dyn OsFuncs>,
        ll: Arc<dyn LowerLayer>,
        filter: Option<Arc<dyn Filter>>,
        handler: Option<Arc<dyn EndpointHandler>>,
        config: EndpointConfig,
    ) -> Result<Endpoint> {
        Ok(Endpoint {
            base: Base::alloc(os, ll, filter, handler, config)?,
        })
    }

    /// 组装服务端端点：传输已连接，打开只做过滤器握手，
    /// 握手完成时 `open_done` 触发。
    ///
    /// 构造后需调用 [`Endpoint::server_start`] 启动握手，调用方得以先把
    /// 端点登记进自己的簿记。
    pub fn server_alloc(
        os: Arc<dyn OsFuncs>,
        ll: Arc<dyn LowerLayer>,
        filter: Option<Arc<dyn Filter>>,
        handler: Option<Arc<dyn EndpointHandler>>,
        config: EndpointConfig,
        open_done: DoneErr,
    ) -> Result<Endpoint> {
        Ok(Endpoint {
            base: Base::server_alloc(os, ll, filter, handler, config, open_done)?,
        })
    }

    /// 启动服务端握手（配合 [`Endpoint::server_alloc`] 使用）；幂等。
    pub fn server_start(&self) {
        self.base.server_start();
    }

    /// 设置（替换）事件回调。必须在打开前完成。
    pub fn set_handler(&self, handler: Arc<dyn EndpointHandler>) {
        self.base.set_handler(handler);
    }

    /// 打开端点；`done` 在打开完成（或失败）后经延迟执行器触发。
    pub fn open(&self, done: DoneErr) -> Result<()> {
        self.base.open(done, true).map_err(|(err, _done)| err)
    }

    /// 打开端点但不打开下层（下层已由他人打开），只驱动过滤器握手。
    pub fn open_nochild(&self, done: DoneErr) -> Result<()> {
        self.base.open(done, false).map_err(|(err, _done)| err)
    }

    /// 关闭端点；`done` 恰好触发一次，且晚于全部读事件。
    ///
    /// 关闭可以抢占在途的打开：此时 `open_done` 先以
    /// `endpoint.cancelled` 收尾，然后 `done` 触发。
    pub fn close(&self, done: Done) -> Result<()> {
        self.base.close(done)
    }

    /// 写入散布缓冲，返回接受的字节数（可能短写，包括 0）。
    pub fn write(&self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize> {
        self.base.write(sg, aux)
    }

    /// 入队一条带外记录；记录完整发出后 `done` 触发。
    pub fn write_oob(&self, data: Bytes, done: Option<Done>) -> Result<()> {
        self.base.send_oob(data, done)
    }

    /// 启停读事件投递。重复设置同一状态是幂等的。
    pub fn set_read_enabled(&self, enabled: bool) {
        self.base.set_read_enabled(enabled);
    }

    /// 启停写就绪通知。
    pub fn set_write_enabled(&self, enabled: bool) {
        self.base.set_write_enabled(enabled);
    }

    /// 层内控制操作；`depth` 为 0 时指过滤器层，其余路由到下层传输。
    pub fn control(&self, depth: usize, get: bool, option: u32, data: &mut ControlData) -> Result<()> {
        self.base.control(depth, get, option, data)
    }

    /// 在既有连接上派生子通道（需要过滤器支持）。
    pub fn alloc_channel(
        &self,
        args: &[&str],
        handler: Arc<dyn EndpointHandler>,
        done: DoneErr,
    ) -> Result<Endpoint> {
        self.base.open_channel(args, handler, done)
    }

    /// 返回对端地址。
    pub fn remote_addr(&self) -> Result<String> {
        self.base.remote_addr()
    }

    /// 返回对端数值标识。
    pub fn remote_id(&self) -> Result<i32> {
        self.base.remote_id()
    }

    /// 硬停：立即切断一切事件；已登记的完成回调不会触发。
    pub fn disable(&self) {
        self.base.disable();
    }
}

impl Clone for Endpoint {
    fn clone(&self) -> Self {
        self.base.add_user_handle();
        Endpoint {
            base: Arc::clone(&self.base),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.base.drop_user_handle();
    }
}
