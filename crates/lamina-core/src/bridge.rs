//! 端点当下层：把一个成形端点插到父端点栈底的桥接件。
//!
//! # 模块定位（Why）
//! - 叠层协议（在 TCP 端点上叠分帧，再叠 TLS……）不需要专门的机制：
//!   把子端点包装成 [`LowerLayer`]，父端点就能像对待任何传输一样驱动它，
//!   叠层深度免费获得。
//! - 桥接件是唯一跨端点的边：它强持有子端点，自身被父端点强持有；
//!   事件方向上只保留弱引用，所有权不会成环。

use alloc::{string::String, sync::Arc};
use spin::Mutex;

use crate::{
    Result,
    aux::AuxTags,
    endpoint::{Endpoint, EndpointHandler},
    error::CoreError,
    ll::{ControlData, Done, DoneErr, LlHandler, LowerLayer, OpenResult},
    runtime::WeakCell,
};

/// `EndpointLl` 以 [`LowerLayer`] 的形状包装一个子端点。
///
/// # 契约说明（What）
/// - 写、打开、关闭、使能与硬停全部转发给子端点；
/// - 子端点的读事件转为下层上行"读"，可写事件转为"写就绪"；
/// - 桥接件注册为子端点的事件回调，构造后子端点不应再被别的回调接管。
pub struct EndpointLl {
    child: Endpoint,
    handler: Mutex<Option<Arc<dyn LlHandler>>>,
}

struct BridgeEvents {
    bridge: WeakCell<EndpointLl>,
}

impl EndpointHandler for BridgeEvents {
    fn read(&self, err: Option<&CoreError>, buf: &[u8], aux: &AuxTags) -> usize {
        let Some(bridge) = self.bridge.get() else {
            return buf.len();
        };
        let Some(handler) = bridge.handler.lock().clone() else {
            return buf.len();
        };
        handler.read(err.cloned(), buf, aux)
    }

    fn write_ready(&self) {
        if let Some(bridge) = self.bridge.get()
            && let Some(handler) = bridge.handler.lock().clone()
        {
            handler.write_ready();
        }
    }
}

impl EndpointLl {
    /// 把子端点包装为下层传输；桥接件随即接管子端点的事件回调。
    pub fn alloc(child: Endpoint) -> Arc<EndpointLl> {
        let bridge = Arc::new(EndpointLl {
            child,
            handler: Mutex::new(None),
        });
        let events = Arc::new(BridgeEvents {
            bridge: WeakCell::new(),
        });
        events.bridge.bind(&bridge);
        bridge.child.set_handler(events);
        bridge
    }

    /// 访问被包装的子端点。
    pub fn child(&self) -> &Endpoint {
        &self.child
    }
}

impl LowerLayer for EndpointLl {
    fn set_handler(&self, handler: Arc<dyn LlHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn write(&self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize> {
        self.child.write(sg, aux)
    }

    fn open(&self, done: DoneErr) -> Result<OpenResult> {
        self.child.open(done)?;
        // 子端点的打开总是经回调收尾。
        Ok(OpenResult::InProgress)
    }

    fn close(&self, done: Done) -> Result<()> {
        self.child.close(done)
    }

    fn set_read_enabled(&self, enabled: bool) {
        self.child.set_read_enabled(enabled);
    }

    fn set_write_enabled(&self, enabled: bool) {
        self.child.set_write_enabled(enabled);
    }

    fn remote_addr(&self) -> Result<String> {
        self.child.remote_addr()
    }

    fn remote_id(&self) -> Result<i32> {
        self.child.remote_id()
    }

    fn control(&self, get: bool, option: u32, data: &mut ControlData) -> Result<()> {
        self.child.control(0, get, option, data)
    }

    fn disable(&self) {
        self.child.disable();
    }
}
