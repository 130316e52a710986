//! 监听侧运行时：核心从接入器索取的最小契约。
//!
//! # 模块定位（Why）
//! - 从核心的视角看，接入器交付的是"已经连通的传输句柄"；每个接入的
//!   子句柄经 [`spawn_server_endpoint`] 走服务端打开路径（只做过滤器
//!   握手），握手完成后以 `new_connection` 交付给应用。
//! - 并发保证与端点完全一致：回调都在事件循环线程上，关停经 done
//!   回调确认。

use alloc::sync::Arc;
use spin::Mutex;

use crate::{
    Result,
    endpoint::{Endpoint, EndpointConfig},
    error::CoreError,
    filter::Filter,
    ll::{ControlData, Done, DoneErr, LowerLayer},
    runtime::OsFuncs,
    sealed::Sealed,
};

/// 接入器的上行事件。
pub trait AccepterHandler: Send + Sync + 'static + Sealed {
    /// 一条新连接完成了服务端握手。
    fn new_connection(&self, endpoint: Endpoint);
}

/// `Accepter` 是监听侧传输驱动的契约。
///
/// # 契约说明（What）
/// - `startup`：开始监听并接受连接；
/// - `shutdown`：停止监听；`done` 在全部在途回调退栈后恰好调用一次；
/// - `set_accept_enabled`：暂停/恢复接受新连接，`done`（若给出）在
///   状态切换对事件循环可见后调用；
/// - `control`：驱动级控制操作。
pub trait Accepter: Send + Sync + 'static + Sealed {
    /// 开始监听。
    fn startup(&self) -> Result<()>;

    /// 停止监听；`done` 恰好调用一次。
    fn shutdown(&self, done: Done) -> Result<()>;

    /// 暂停或恢复接受新连接。
    fn set_accept_enabled(&self, enabled: bool, done: Option<Done>);

    /// 驱动级控制操作。
    fn control(&self, _get: bool, _option: u32, _data: &mut ControlData) -> Result<()> {
        Err(CoreError::not_supported("control not supported"))
    }
}

/// 从一个已接入的下层传输构造服务端端点并驱动握手。
///
/// # 逻辑解析（How）
/// 1. 以服务端路径组装端点（传输已连通，打开只差过滤器握手）；
/// 2. 握手完成回调里把端点经 `new_connection` 交付给应用；
/// 3. 握手失败的连接被静默丢弃（端点随句柄释放回收），接入器继续服务。
///
/// # 契约说明（What）
/// - 返回的端点已开始握手；应用应当在 `new_connection` 里设置事件回调
///   并开启读使能。
pub fn spawn_server_endpoint(
    os: Arc<dyn OsFuncs>,
    ll: Arc<dyn LowerLayer>,
    filter: Option<Arc<dyn Filter>>,
    config: EndpointConfig,
    handler: Arc<dyn AccepterHandler>,
) -> Result<Endpoint> {
    let slot: Arc<Mutex<Option<Endpoint>>> = Arc::new(Mutex::new(None));
    let done_slot = Arc::clone(&slot);
    let open_done: DoneErr = Box::new(move |result| {
        let endpoint = done_slot.lock().take();
        if let (Ok(()), Some(endpoint)) = (result, endpoint) {
            handler.new_connection(endpoint);
        }
    });
    let endpoint = Endpoint::server_alloc(os, ll, filter, None, config, open_done)?;
    *slot.lock() = Some(endpoint.clone());
    endpoint.server_start();
    Ok(endpoint)
}
