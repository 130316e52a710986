//! 基础端点：把一个下层传输与至多一个过滤器焊接成完整端点的状态机。
//!
//! # 模块定位（Why）
//! - 所有传输与协议组合共用这一台状态机：打开/关闭时序、数据搬运、
//!   使能重算、错误上抛、引用纪律在此一次做对，换任何过滤器或传输
//!   都不再重写。
//! - 难点集中在重入与析构：用户回调里可以再调端点，关闭可以抢占在途
//!   打开，延迟执行器负责把所有用户可见通知推到当前调用栈之外。
//!
//! # 并发模型（How）
//! - 内部状态由自旋锁保护；任何用户或过滤器回调都在锁外发生；
//! - 过滤器实现持有自己的内部锁，契约要求它在调用数据出口（sink）时
//!   不得持锁，因此"基础端点锁 → 过滤器锁"与"过滤器内部 → 基础端点锁"
//!   不会交叉成环；
//! - 同一时刻至多一个在途打开与一个在途关闭，第二个请求被同步拒绝。

use alloc::{boxed::Box, string::String, sync::Arc};
use bytes::Bytes;
use core::time::Duration;

use spin::Mutex;

use crate::{
    Result,
    aux::AuxTags,
    endpoint::{EndpointConfig, EndpointHandler},
    error::CoreError,
    filter::{Filter, FilterCtl, LlSink, ProgressOutcome, UlSink},
    ll::{ControlData, Done, DoneErr, LlHandler, LowerLayer, OpenResult},
    runtime::{
        DeferredRunner, MonotonicTimePoint, OsFuncs, RunnerHandler, Timer, TimerHandler, WeakCell,
    },
};

use super::oob::OobQueue;

const LOG_TARGET: &str = "lamina::endpoint";

/// 端点生命周期状态。
///
/// 打开沿 `Closed → LlOpening → FilterOpening → Open` 推进；关闭沿
/// `Open → CloseDrainWait → FilterClosing → LlClosing → CloseNotify → Closed`
/// 推进。`OpenPending` 是服务端接入的入口（传输已连接，只差握手）；
/// `WaitOpenClear` 表示新的打开请求在等待上一轮关闭通知出栈；
/// `ClosedFault` 记录"上一次打开失败"，下一次打开会将其复位。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EndpointState {
    Closed,
    WaitOpenClear,
    LlOpening,
    FilterOpening,
    OpenPending,
    Open,
    CloseDrainWait,
    FilterClosing,
    LlClosing,
    CloseNotify,
    ClosedFault,
}

struct PendingOpen {
    done: DoneErr,
    open_child: bool,
}

struct Inner {
    state: EndpointState,
    handler: Option<Arc<dyn EndpointHandler>>,
    read_enabled: bool,
    write_enabled: bool,
    in_user_read: bool,
    open_done: Option<DoneErr>,
    close_done: Option<Done>,
    pending_open: Option<PendingOpen>,
    pending_open_err: Option<CoreError>,
    saved_err: Option<CoreError>,
    err_delivered: bool,
    open_failed: bool,
    disconnect_done: bool,
    open_deadline: Option<MonotonicTimePoint>,
    timer_running: bool,
    deferred_pending: bool,
    deferred_read: bool,
    deferred_open: Option<Result<()>>,
    deferred_close: bool,
    deferred_server_start: bool,
    oob: OobQueue,
    oob_draining: bool,
    user_handles: usize,
}

/// `Base` 是端点的内部本体；用户通过 [`crate::endpoint::Endpoint`] 句柄访问。
pub(crate) struct Base {
    os: Arc<dyn OsFuncs>,
    ll: Arc<dyn LowerLayer>,
    filter: Option<Arc<dyn Filter>>,
    config: EndpointConfig,
    timer: Mutex<Option<Arc<dyn Timer>>>,
    runner: Mutex<Option<Arc<dyn DeferredRunner>>>,
    filter_ctl: Mutex<Option<Arc<BaseFilterCtl>>>,
    inner: Mutex<Inner>,
}

struct BaseLlHandler {
    base: WeakCell<Base>,
}

impl LlHandler for BaseLlHandler {
    fn read(&self, err: Option<CoreError>, buf: &[u8], aux: &AuxTags) -> usize {
        match self.base.get() {
            Some(base) => base.ll_read(err, buf, aux),
            None => buf.len(),
        }
    }

    fn write_ready(&self) {
        if let Some(base) = self.base.get() {
            base.ll_write_ready();
        }
    }
}

struct BaseDeferred {
    base: WeakCell<Base>,
}

impl RunnerHandler for BaseDeferred {
    fn run(&self) {
        if let Some(base) = self.base.get() {
            base.deferred_op();
        }
    }
}

struct BaseTimer {
    base: WeakCell<Base>,
}

impl TimerHandler for BaseTimer {
    fn timeout(&self) {
        if let Some(base) = self.base.get() {
            base.timer_fired();
        }
    }
}

struct BaseFilterCtl {
    base: WeakCell<Base>,
}

impl FilterCtl for BaseFilterCtl {
    fn output_ready(&self) {
        let Some(base) = self.base.get() else {
            return;
        };
        // 异步产生的输出：经延迟执行器重算使能，并尝试向上排水。
        let mut st = base.inner.lock();
        st.deferred_read = true;
        base.sched_deferred_locked(&mut st);
    }

    fn start_timer(&self, delay: Duration) {
        if let Some(base) = self.base.get() {
            base.restart_timer(delay);
        }
    }
}

/// 把过滤器下行输出写进下层传输的数据出口。
struct LlWriteSink<'a> {
    ll: &'a dyn LowerLayer,
}

impl LlSink for LlWriteSink<'_> {
    fn write(&mut self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize> {
        self.ll.write(sg, aux)
    }
}

/// 把过滤器上行输出投递给用户的数据出口。
struct UserSink<'a> {
    base: &'a Arc<Base>,
}

impl UlSink for UserSink<'_> {
    fn deliver(&mut self, buf: &[u8], aux: &AuxTags) -> Result<usize> {
        Ok(self.base.deliver_to_user(None, buf, aux))
    }
}

/// 握手期间的上行出口：一律背压（过滤器必须把解码数据留在内部缓冲，
/// 等打开完成后经正常排水路径投递）。
struct HoldUlSink;

impl UlSink for HoldUlSink {
    fn deliver(&mut self, _buf: &[u8], _aux: &AuxTags) -> Result<usize> {
        Ok(0)
    }
}

impl Base {
    pub(crate) fn alloc(
        os: Arc<dyn OsFuncs>,
        ll: Arc<dyn LowerLayer>,
        filter: Option<Arc<dyn Filter>>,
        handler: Option<Arc<dyn EndpointHandler>>,
        config: EndpointConfig,
    ) -> Result<Arc<Base>> {
        let base = Arc::new(Base {
            os: Arc::clone(&os),
            ll: Arc::clone(&ll),
            filter,
            config,
            timer: Mutex::new(None),
            runner: Mutex::new(None),
            filter_ctl: Mutex::new(None),
            inner: Mutex::new(Inner {
                state: EndpointState::Closed,
                handler,
                read_enabled: false,
                write_enabled: false,
                in_user_read: false,
                open_done: None,
                close_done: None,
                pending_open: None,
                pending_open_err: None,
                saved_err: None,
                err_delivered: false,
                open_failed: false,
                disconnect_done: false,
                open_deadline: None,
                timer_running: false,
                deferred_pending: false,
                deferred_read: false,
                deferred_open: None,
                deferred_close: false,
                deferred_server_start: false,
                oob: OobQueue::new(),
                oob_draining: false,
                user_handles: 1,
            }),
        });

        let deferred = Arc::new(BaseDeferred {
            base: WeakCell::new(),
        });
        deferred.base.bind(&base);
        *base.runner.lock() = Some(os.alloc_runner(deferred)?);

        let tick = Arc::new(BaseTimer {
            base: WeakCell::new(),
        });
        tick.base.bind(&base);
        *base.timer.lock() = Some(os.alloc_timer(tick)?);

        let ctl = Arc::new(BaseFilterCtl {
            base: WeakCell::new(),
        });
        ctl.base.bind(&base);
        *base.filter_ctl.lock() = Some(ctl);

        let ll_handler = Arc::new(BaseLlHandler {
            base: WeakCell::new(),
        });
        ll_handler.base.bind(&base);
        ll.set_handler(ll_handler);

        Ok(base)
    }

    /// 服务端构造：传输已连接，打开只剩过滤器握手。
    ///
    /// 握手由 [`Base::server_start`] 经延迟执行器启动，调用方得以先把
    /// 端点登记妥当，任何回调都不会跑在构造之前。
    pub(crate) fn server_alloc(
        os: Arc<dyn OsFuncs>,
        ll: Arc<dyn LowerLayer>,
        filter: Option<Arc<dyn Filter>>,
        handler: Option<Arc<dyn EndpointHandler>>,
        config: EndpointConfig,
        open_done: DoneErr,
    ) -> Result<Arc<Base>> {
        let base = Self::alloc(os, ll, filter, handler, config)?;
        if let Some(filter) = &base.filter {
            filter.setup(base.filter_ctl())?;
        }
        let mut st = base.inner.lock();
        st.state = EndpointState::OpenPending;
        st.open_done = Some(open_done);
        st.open_deadline = base
            .config
            .handshake_timeout
            .map(|ceiling| base.os.now().saturating_add(ceiling));
        drop(st);
        Ok(base)
    }

    /// 启动服务端握手；只在 `OpenPending` 状态下有效，幂等。
    pub(crate) fn server_start(self: &Arc<Self>) {
        let mut st = self.inner.lock();
        if st.state == EndpointState::OpenPending && !st.deferred_server_start {
            st.deferred_server_start = true;
            self.sched_deferred_locked(&mut st);
        }
    }

    fn runner(&self) -> Arc<dyn DeferredRunner> {
        self.runner
            .lock()
            .clone()
            .expect("runner is bound during alloc")
    }

    fn timer(&self) -> Arc<dyn Timer> {
        self.timer
            .lock()
            .clone()
            .expect("timer is bound during alloc")
    }

    fn filter_ctl(&self) -> Arc<BaseFilterCtl> {
        self.filter_ctl
            .lock()
            .clone()
            .expect("filter ctl is bound during alloc")
    }

    fn handler(&self) -> Option<Arc<dyn EndpointHandler>> {
        self.inner.lock().handler.clone()
    }

    fn sched_deferred_locked(&self, st: &mut Inner) {
        if !st.deferred_pending {
            st.deferred_pending = true;
            let _ = self.runner().schedule();
        }
    }

    pub(crate) fn set_handler(&self, handler: Arc<dyn EndpointHandler>) {
        self.inner.lock().handler = Some(handler);
    }

    pub(crate) fn add_user_handle(&self) {
        self.inner.lock().user_handles += 1;
    }

    /// 用户句柄全部释放：隐式关闭仍然打开的端点。
    pub(crate) fn drop_user_handle(self: &Arc<Self>) {
        let should_close = {
            let mut st = self.inner.lock();
            st.user_handles -= 1;
            st.user_handles == 0
                && matches!(
                    st.state,
                    EndpointState::Open
                        | EndpointState::OpenPending
                        | EndpointState::LlOpening
                        | EndpointState::FilterOpening
                )
        };
        if should_close {
            let _ = self.close(Box::new(|| {}));
        }
    }

    // ------------------------------------------------------------------
    // 打开协议
    // ------------------------------------------------------------------

    /// 打开端点。同步失败时交还 `done`，让调用方决定如何收尾。
    pub(crate) fn open(
        self: &Arc<Self>,
        done: DoneErr,
        open_child: bool,
    ) -> core::result::Result<(), (CoreError, DoneErr)> {
        {
            let mut st = self.inner.lock();
            match st.state {
                EndpointState::Closed | EndpointState::ClosedFault => {
                    // 占位，阻止并发的第二个打开。
                    st.state = EndpointState::LlOpening;
                    st.open_failed = false;
                }
                EndpointState::CloseNotify => {
                    // 上一轮关闭的通知尚未出栈：排队，通知出栈后接力。
                    st.pending_open = Some(PendingOpen { done, open_child });
                    st.state = EndpointState::WaitOpenClear;
                    return Ok(());
                }
                _ => {
                    return Err((
                        CoreError::not_ready("endpoint is already open or opening"),
                        done,
                    ));
                }
            }
        }

        if let Some(filter) = &self.filter
            && let Err(err) = filter.setup(self.filter_ctl())
        {
            self.inner.lock().state = EndpointState::Closed;
            return Err((err, done));
        }

        let mut st = self.inner.lock();
        st.open_done = Some(done);
        st.saved_err = None;
        st.err_delivered = false;
        st.disconnect_done = false;
        st.open_deadline = self
            .config
            .handshake_timeout
            .map(|ceiling| self.os.now().saturating_add(ceiling));

        if !open_child {
            // 下层已经打开（例如桥接在一个已打开的子端点上）：直奔握手。
            st.state = EndpointState::FilterOpening;
            drop(st);
            self.run_connect_loop();
            return Ok(());
        }
        drop(st);

        let this = Arc::clone(self);
        match self.ll.open(Box::new(move |res| this.ll_open_done(res))) {
            Ok(OpenResult::Open) => {
                self.inner.lock().state = EndpointState::FilterOpening;
                self.run_connect_loop();
                Ok(())
            }
            Ok(OpenResult::InProgress) => Ok(()),
            Err(err) => {
                let done = {
                    let mut st = self.inner.lock();
                    st.state = EndpointState::Closed;
                    st.open_done.take()
                };
                if let Some(filter) = &self.filter {
                    filter.cleanup();
                }
                Err((err, done.expect("open_done was stashed above")))
            }
        }
    }

    fn ll_open_done(self: &Arc<Self>, result: Result<()>) {
        let mut st = self.inner.lock();
        match st.state {
            EndpointState::LlOpening => match result {
                Ok(()) => {
                    st.state = EndpointState::FilterOpening;
                    drop(st);
                    self.run_connect_loop();
                }
                Err(err) => {
                    // 下层打开失败：没有需要再关的传输，直接进入通知收尾。
                    st.state = EndpointState::CloseNotify;
                    st.open_failed = true;
                    st.deferred_open = Some(Err(err));
                    self.sched_deferred_locked(&mut st);
                }
            },
            EndpointState::LlClosing => {
                // 关闭抢占了在途打开；取消语义已由 pending_open_err 记录，
                // 等下层关闭收尾统一补发通知。
            }
            _ => {}
        }
    }

    /// 握手推进：交替执行 `try_connect` 与数据搬运，直到完成、失败或挂起。
    fn run_connect_loop(self: &Arc<Self>) {
        let Some(filter) = self.filter.clone() else {
            self.finish_open();
            return;
        };

        {
            let st = self.inner.lock();
            if st.state != EndpointState::FilterOpening {
                return;
            }
            if let Some(deadline) = st.open_deadline
                && self.os.now() >= deadline
            {
                drop(st);
                self.abort_open(CoreError::timed_out());
                return;
            }
        }

        match filter.try_connect() {
            Err(err) => self.abort_open(err),
            Ok(ProgressOutcome::Complete) => {
                self.flush_filter_down();
                match filter.check_open_done() {
                    Ok(()) => self.finish_open(),
                    Err(err) => self.abort_open(err),
                }
            }
            Ok(ProgressOutcome::RetryOnIo) => {
                self.flush_filter_down();
                self.arm_handshake(None);
            }
            Ok(ProgressOutcome::RetryOnIoOrTimer(delay)) => {
                self.flush_filter_down();
                self.arm_handshake(Some(delay));
            }
        }
    }

    /// 握手挂起：使能下层 I/O，并保证总截止时间始终有定时器兜底。
    fn arm_handshake(self: &Arc<Self>, filter_delay: Option<Duration>) {
        let write_pending = self
            .filter
            .as_ref()
            .map(|f| f.ll_write_pending())
            .unwrap_or(false);
        self.ll.set_read_enabled(true);
        self.ll.set_write_enabled(write_pending);

        let remaining = {
            let st = self.inner.lock();
            st.open_deadline
                .map(|deadline| deadline.saturating_duration_since(self.os.now()))
        };
        let delay = match (filter_delay, remaining) {
            (Some(fd), Some(rem)) => Some(fd.min(rem)),
            (Some(fd), None) => Some(fd),
            (None, Some(rem)) => Some(rem),
            (None, None) => None,
        };
        if let Some(delay) = delay {
            self.restart_timer(delay);
        }
    }

    fn finish_open(self: &Arc<Self>) {
        let mut st = self.inner.lock();
        if !matches!(
            st.state,
            EndpointState::FilterOpening | EndpointState::LlOpening
        ) {
            return;
        }
        st.state = EndpointState::Open;
        st.deferred_open = Some(Ok(()));
        self.stop_timer_locked(&mut st);
        self.sched_deferred_locked(&mut st);
    }

    /// 中止在途打开：先关下层，再补发 `open_done(err)`；用户不会看到打开成功。
    fn abort_open(self: &Arc<Self>, err: CoreError) {
        let mut st = self.inner.lock();
        if !matches!(
            st.state,
            EndpointState::FilterOpening | EndpointState::LlOpening
        ) {
            return;
        }
        self.os.logger().debug(
            LOG_TARGET,
            "aborting in-flight open",
            &[("code", &err.code())],
        );
        st.open_failed = true;
        st.pending_open_err = Some(err);
        st.state = EndpointState::LlClosing;
        self.stop_timer_locked(&mut st);
        drop(st);
        self.ll_close();
    }

    // ------------------------------------------------------------------
    // 关闭协议
    // ------------------------------------------------------------------

    pub(crate) fn close(self: &Arc<Self>, done: Done) -> Result<()> {
        let mut st = self.inner.lock();
        match st.state {
            EndpointState::Open | EndpointState::OpenPending => {
                st.close_done = Some(done);
                let has_filter = self.filter.is_some();
                st.disconnect_done = false;
                st.state = if has_filter {
                    let write_pending = {
                        // 谓词只读过滤器内部状态，契约要求它无锁可重入。
                        self.filter
                            .as_ref()
                            .map(|f| f.ll_write_pending())
                            .unwrap_or(false)
                    };
                    if write_pending {
                        EndpointState::CloseDrainWait
                    } else {
                        EndpointState::FilterClosing
                    }
                } else {
                    EndpointState::LlClosing
                };
                let state = st.state;
                self.stop_timer_locked(&mut st);
                drop(st);
                if state == EndpointState::LlClosing {
                    self.ll_close();
                } else {
                    self.progress_close();
                }
                Ok(())
            }
            EndpointState::LlOpening | EndpointState::FilterOpening => {
                // 关闭抢占在途打开：open_done(CANCELLED) 先于 close_done。
                st.close_done = Some(done);
                st.pending_open_err = Some(CoreError::cancelled());
                st.open_failed = true;
                st.state = EndpointState::LlClosing;
                self.stop_timer_locked(&mut st);
                drop(st);
                self.ll_close();
                Ok(())
            }
            _ => Err(CoreError::not_ready("endpoint is not open")),
        }
    }

    /// 推进关闭流程：先排空普通数据，再走断开协商，最后关下层。
    fn progress_close(self: &Arc<Self>) {
        let state = self.inner.lock().state;
        match state {
            EndpointState::CloseDrainWait => {
                self.flush_filter_down();
                let still_pending = self
                    .filter
                    .as_ref()
                    .map(|f| f.ll_write_pending())
                    .unwrap_or(false);
                if still_pending {
                    self.ll.set_write_enabled(true);
                    return;
                }
                self.inner.lock().state = EndpointState::FilterClosing;
                self.progress_close();
            }
            EndpointState::FilterClosing => {
                let Some(filter) = self.filter.clone() else {
                    self.ll_close();
                    return;
                };
                if self.inner.lock().disconnect_done {
                    self.finish_disconnect_drain(&filter);
                    return;
                }
                match filter.try_disconnect() {
                    Ok(ProgressOutcome::Complete) => {
                        self.inner.lock().disconnect_done = true;
                        self.finish_disconnect_drain(&filter);
                    }
                    Ok(ProgressOutcome::RetryOnIo) => {
                        self.flush_filter_down();
                        self.ll.set_read_enabled(true);
                        self.ll.set_write_enabled(filter.ll_write_pending());
                    }
                    Ok(ProgressOutcome::RetryOnIoOrTimer(delay)) => {
                        self.flush_filter_down();
                        self.ll.set_read_enabled(true);
                        self.ll.set_write_enabled(filter.ll_write_pending());
                        self.restart_timer(delay);
                    }
                    Err(err) => {
                        // 告别失败不阻塞关闭，直接关下层。
                        self.os.logger().debug(
                            LOG_TARGET,
                            "filter disconnect failed, closing anyway",
                            &[("code", &err.code())],
                        );
                        let mut st = self.inner.lock();
                        st.state = EndpointState::LlClosing;
                        drop(st);
                        self.ll_close();
                    }
                }
            }
            _ => {}
        }
    }

    /// 断开协商已完成：确保告别字节全部落到下层后，再关闭传输。
    fn finish_disconnect_drain(self: &Arc<Self>, filter: &Arc<dyn Filter>) {
        self.flush_filter_down();
        if filter.ll_write_pending() {
            self.ll.set_write_enabled(true);
            return;
        }
        self.inner.lock().state = EndpointState::LlClosing;
        self.ll_close();
    }

    fn ll_close(self: &Arc<Self>) {
        let this = Arc::clone(self);
        match self.ll.close(Box::new(move || this.ll_close_done())) {
            Ok(()) => {}
            Err(_) => {
                // 下层已经不在打开态（例如下层打开本身失败）：直接收尾。
                self.ll_close_done();
            }
        }
    }

    fn ll_close_done(self: &Arc<Self>) {
        if let Some(filter) = &self.filter {
            filter.cleanup();
        }
        let mut st = self.inner.lock();
        if st.state != EndpointState::WaitOpenClear {
            st.state = EndpointState::CloseNotify;
        }
        if let Some(err) = st.pending_open_err.take() {
            st.deferred_open = Some(Err(err));
        }
        if st.close_done.is_some() {
            st.deferred_close = true;
        }
        self.stop_timer_locked(&mut st);
        self.sched_deferred_locked(&mut st);
    }

    // ------------------------------------------------------------------
    // 数据搬运
    // ------------------------------------------------------------------

    fn ll_read(self: &Arc<Self>, err: Option<CoreError>, buf: &[u8], aux: &AuxTags) -> usize {
        let state = self.inner.lock().state;
        match state {
            EndpointState::FilterOpening => {
                if let Some(err) = err {
                    self.abort_open(err);
                    return buf.len();
                }
                let consumed = match &self.filter {
                    Some(filter) => {
                        let mut sink = HoldUlSink;
                        match filter.ll_write(buf, aux, &mut sink) {
                            Ok(count) => count,
                            Err(err) => {
                                self.abort_open(err);
                                return buf.len();
                            }
                        }
                    }
                    None => buf.len(),
                };
                self.run_connect_loop();
                consumed
            }
            EndpointState::Open
            | EndpointState::CloseDrainWait
            | EndpointState::FilterClosing => {
                if let Some(err) = err {
                    self.handle_io_error(err, state);
                    return buf.len();
                }
                let consumed = match &self.filter {
                    Some(filter) => {
                        let mut sink = UserSink { base: self };
                        match filter.ll_write(buf, aux, &mut sink) {
                            Ok(count) => count,
                            Err(err) => {
                                self.handle_io_error(err, state);
                                buf.len()
                            }
                        }
                    }
                    None => self.deliver_to_user(None, buf, aux),
                };
                if matches!(
                    state,
                    EndpointState::CloseDrainWait | EndpointState::FilterClosing
                ) {
                    self.progress_close();
                } else {
                    self.recompute_enables();
                }
                consumed
            }
            _ => buf.len(),
        }
    }

    fn ll_write_ready(self: &Arc<Self>) {
        let state = self.inner.lock().state;
        match state {
            EndpointState::FilterOpening => {
                self.flush_filter_down();
                self.run_connect_loop();
            }
            EndpointState::Open => {
                if !self.drain_oob() {
                    if let Some(filter) = &self.filter
                        && filter.ll_write_pending()
                    {
                        self.flush_filter_down();
                    }
                    let notify = {
                        let st = self.inner.lock();
                        st.write_enabled && st.state == EndpointState::Open
                    };
                    if notify && let Some(handler) = self.handler() {
                        handler.write_ready();
                    }
                }
                self.recompute_enables();
            }
            EndpointState::CloseDrainWait | EndpointState::FilterClosing => {
                self.progress_close();
            }
            _ => {}
        }
    }

    /// 把过滤器内部积压的下行数据写进下层（`ul_write` 空散布即排水）。
    fn flush_filter_down(&self) {
        if let Some(filter) = &self.filter
            && filter.ll_write_pending()
        {
            let mut sink = LlWriteSink {
                ll: self.ll.as_ref(),
            };
            if let Err(err) = filter.ul_write(&[], &AuxTags::empty(), &mut sink) {
                self.os.logger().debug(
                    LOG_TARGET,
                    "filter drain failed",
                    &[("code", &err.code())],
                );
            }
        }
    }

    /// 把一段数据投递给用户，返回消费量；不可投递时返回 0（上方背压）。
    fn deliver_to_user(&self, err: Option<&CoreError>, buf: &[u8], aux: &AuxTags) -> usize {
        let handler = {
            let mut st = self.inner.lock();
            let readable_state = matches!(
                st.state,
                EndpointState::Open | EndpointState::CloseDrainWait | EndpointState::FilterClosing
            );
            if !readable_state || !st.read_enabled || st.in_user_read {
                return 0;
            }
            let Some(handler) = st.handler.clone() else {
                return 0;
            };
            // 用户回调期间视作读挡闸：嵌套投递一律背压。
            st.in_user_read = true;
            handler
        };
        let count = handler.read(err, buf, aux);
        let mut st = self.inner.lock();
        st.in_user_read = false;
        self.sched_deferred_locked(&mut st);
        drop(st);
        count.min(buf.len())
    }

    /// `Open` 期间的 I/O 错误：上抛一次，端点保持用户视角的打开；
    /// 关闭期间的错误直接加速关闭。
    fn handle_io_error(self: &Arc<Self>, err: CoreError, state: EndpointState) {
        if matches!(
            state,
            EndpointState::CloseDrainWait | EndpointState::FilterClosing
        ) {
            let mut st = self.inner.lock();
            st.state = EndpointState::LlClosing;
            drop(st);
            self.ll_close();
            return;
        }
        let mut st = self.inner.lock();
        if st.saved_err.is_some() {
            // 第二个错误吞掉。
            return;
        }
        st.saved_err = Some(err);
        if st.read_enabled {
            st.deferred_read = true;
            self.sched_deferred_locked(&mut st);
        }
    }

    // ------------------------------------------------------------------
    // 使能重算与延迟执行
    // ------------------------------------------------------------------

    /// 下层读写使能 = 用户意图与过滤器需求的并集。
    fn recompute_enables(&self) {
        let (read_needed, write_pending) = match &self.filter {
            Some(filter) => (filter.ll_read_needed(), filter.ll_write_pending()),
            None => (false, false),
        };
        let (read_on, write_on) = {
            let st = self.inner.lock();
            if st.state != EndpointState::Open {
                return;
            }
            (
                (st.read_enabled && !st.in_user_read) || read_needed,
                st.write_enabled || write_pending || !st.oob.is_empty(),
            )
        };
        self.ll.set_read_enabled(read_on);
        self.ll.set_write_enabled(write_on);
    }

    fn deferred_op(self: &Arc<Self>) {
        let mut st = self.inner.lock();
        st.deferred_pending = false;

        if let Some(result) = st.deferred_open.take() {
            let done = st.open_done.take();
            drop(st);
            if let Some(done) = done {
                done(result);
            }
            st = self.inner.lock();
        }

        if st.deferred_server_start {
            st.deferred_server_start = false;
            if st.state == EndpointState::OpenPending {
                st.state = EndpointState::FilterOpening;
                drop(st);
                self.run_connect_loop();
                st = self.inner.lock();
            }
        }

        if st.deferred_read {
            st.deferred_read = false;
            let deliver_err = if st.read_enabled && !st.err_delivered {
                st.saved_err.clone().inspect(|_| st.err_delivered = true)
            } else {
                None
            };
            drop(st);
            if let Some(err) = deliver_err {
                self.deliver_to_user(Some(&err), &[], &AuxTags::empty());
            }
            if let Some(filter) = &self.filter
                && filter.ul_read_pending()
            {
                let mut sink = UserSink { base: self };
                if let Err(err) = filter.ll_write(&[], &AuxTags::empty(), &mut sink) {
                    self.handle_io_error(err, EndpointState::Open);
                }
            }
            let still_pending = self
                .filter
                .as_ref()
                .map(|f| f.ul_read_pending())
                .unwrap_or(false);
            st = self.inner.lock();
            if still_pending && st.read_enabled && !st.deferred_read {
                // 上方零消费的背压信号：读保持使能期间经延迟执行器重投。
                st.deferred_read = true;
                self.sched_deferred_locked(&mut st);
                drop(st);
                self.os.logger().debug(
                    LOG_TARGET,
                    "upper layer left decoded data pending, re-offering",
                    &[],
                );
                st = self.inner.lock();
            }
        }

        if st.deferred_close {
            st.deferred_close = false;
            let done = st.close_done.take();
            drop(st);
            if let Some(done) = done {
                done();
            }
            st = self.inner.lock();
        }

        // 通知全部出栈后落定终态；排队的打开在此接力。
        if matches!(
            st.state,
            EndpointState::CloseNotify | EndpointState::WaitOpenClear
        ) && st.deferred_open.is_none()
            && !st.deferred_close
            && st.open_done.is_none()
            && st.close_done.is_none()
        {
            let pending = st.pending_open.take();
            st.state = if st.open_failed && pending.is_none() {
                EndpointState::ClosedFault
            } else {
                EndpointState::Closed
            };
            drop(st);
            if let Some(pending) = pending
                && let Err((err, done)) = self.open(pending.done, pending.open_child)
            {
                done(Err(err));
            }
            st = self.inner.lock();
        }

        drop(st);
        self.recompute_enables();
    }

    fn timer_fired(self: &Arc<Self>) {
        let state = {
            let mut st = self.inner.lock();
            st.timer_running = false;
            st.state
        };
        match state {
            EndpointState::FilterOpening => {
                if let Some(filter) = &self.filter {
                    filter.timeout();
                }
                self.run_connect_loop();
            }
            EndpointState::CloseDrainWait | EndpointState::FilterClosing => {
                if let Some(filter) = &self.filter {
                    filter.timeout();
                }
                self.progress_close();
            }
            EndpointState::Open => {
                if let Some(filter) = &self.filter {
                    filter.timeout();
                    if filter.ul_read_pending() {
                        let mut st = self.inner.lock();
                        st.deferred_read = true;
                        self.sched_deferred_locked(&mut st);
                    }
                }
                self.recompute_enables();
            }
            _ => {}
        }
    }

    /// 重启过滤器定时器；若定时器正在触发中，经 stop-with-done 衔接。
    fn restart_timer(self: &Arc<Self>, delay: Duration) {
        let timer = self.timer();
        match timer.start(delay) {
            Ok(()) => {
                self.inner.lock().timer_running = true;
            }
            Err(_) => {
                // 已在运行：停掉再重启。done 在任何在途到期退栈后执行，
                // "停表-重启"不会丢拍也不会并发触发。
                let this = Arc::clone(self);
                let restart: Box<dyn FnOnce() + Send> = Box::new(move || {
                    let _ = this.timer().start(delay);
                    this.inner.lock().timer_running = true;
                });
                match timer.stop_with_done(restart) {
                    Ok(()) => {}
                    Err(_) => {
                        // 在停和重启之间自然到期了：重新武装即可。
                        let _ = timer.start(delay);
                        self.inner.lock().timer_running = true;
                    }
                }
            }
        }
    }

    fn stop_timer_locked(&self, st: &mut Inner) {
        if st.timer_running {
            st.timer_running = false;
            let _ = self.timer().stop();
        }
    }

    // ------------------------------------------------------------------
    // 用户操作
    // ------------------------------------------------------------------

    pub(crate) fn write(self: &Arc<Self>, sg: &[&[u8]], aux: &AuxTags) -> Result<usize> {
        {
            let st = self.inner.lock();
            if st.state != EndpointState::Open {
                return Err(CoreError::not_ready("endpoint is not open"));
            }
            if st.oob.head_partial() {
                // 带外记录发到一半：普通写让路，保证记录不被拆散。
                return Ok(0);
            }
        }
        let count = self.write_through(sg, aux)?;
        self.recompute_enables();
        Ok(count)
    }

    fn write_through(&self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize> {
        match &self.filter {
            Some(filter) => {
                let mut sink = LlWriteSink {
                    ll: self.ll.as_ref(),
                };
                filter.ul_write(sg, aux, &mut sink)
            }
            None => self.ll.write(sg, aux),
        }
    }

    pub(crate) fn send_oob(self: &Arc<Self>, data: Bytes, done: Option<Done>) -> Result<()> {
        {
            let mut st = self.inner.lock();
            if st.state != EndpointState::Open {
                return Err(CoreError::not_ready("endpoint is not open"));
            }
            st.oob.push(data, done);
        }
        self.recompute_enables();
        Ok(())
    }

    /// 写就绪时机会性排水带外队列；返回队列是否占用了本次写就绪。
    fn drain_oob(self: &Arc<Self>) -> bool {
        let mut st = self.inner.lock();
        if st.oob.is_empty() {
            return false;
        }
        if st.oob_draining {
            // 嵌套的写就绪（send_done 回调里再触发）不重入排水循环。
            return true;
        }
        st.oob_draining = true;
        loop {
            let Some(chunk) = st.oob.head_chunk() else {
                break;
            };
            drop(st);
            let aux = AuxTags::oob();
            let result = self.write_through(&[chunk.as_ref()], &aux);
            st = self.inner.lock();
            match result {
                Ok(count) => {
                    let done = st.oob.advance(count);
                    if let Some(done) = done {
                        drop(st);
                        done();
                        st = self.inner.lock();
                    }
                    if count < chunk.len() {
                        // 短写：剩余部分等下一次写就绪。
                        break;
                    }
                }
                Err(err) => {
                    drop(st);
                    self.handle_io_error(err, EndpointState::Open);
                    st = self.inner.lock();
                    break;
                }
            }
        }
        st.oob_draining = false;
        true
    }

    pub(crate) fn set_read_enabled(self: &Arc<Self>, enabled: bool) {
        let ul_pending = self
            .filter
            .as_ref()
            .map(|f| f.ul_read_pending())
            .unwrap_or(false);
        {
            let mut st = self.inner.lock();
            st.read_enabled = enabled;
            let undelivered_err = st.saved_err.is_some() && !st.err_delivered;
            if enabled && st.state == EndpointState::Open && (ul_pending || undelivered_err) {
                // 缓冲数据经延迟执行器投递，绝不在用户调用栈上重入。
                st.deferred_read = true;
                self.sched_deferred_locked(&mut st);
            }
        }
        self.recompute_enables();
    }

    pub(crate) fn set_write_enabled(self: &Arc<Self>, enabled: bool) {
        self.inner.lock().write_enabled = enabled;
        self.recompute_enables();
    }

    pub(crate) fn control(
        &self,
        depth: usize,
        get: bool,
        option: u32,
        data: &mut ControlData,
    ) -> Result<()> {
        if depth == 0
            && let Some(filter) = &self.filter
        {
            return filter.control(get, option, data);
        }
        self.ll.control(get, option, data)
    }

    pub(crate) fn remote_addr(&self) -> Result<String> {
        self.ll.remote_addr()
    }

    pub(crate) fn remote_id(&self) -> Result<i32> {
        self.ll.remote_id()
    }

    pub(crate) fn open_channel(
        &self,
        args: &[&str],
        handler: Arc<dyn EndpointHandler>,
        done: Box<dyn FnOnce(Result<()>) + Send>,
    ) -> Result<crate::endpoint::Endpoint> {
        match &self.filter {
            Some(filter) => filter.open_channel(args, handler, done),
            None => Err(CoreError::not_supported("endpoint has no channel support")),
        }
    }

    /// 硬停：立即切断一切事件，不触发任何已登记的完成回调。
    pub(crate) fn disable(&self) {
        {
            let mut st = self.inner.lock();
            st.state = EndpointState::Closed;
            st.open_done = None;
            st.close_done = None;
            st.pending_open = None;
            st.pending_open_err = None;
            st.deferred_open = None;
            st.deferred_close = false;
            st.deferred_read = false;
            self.stop_timer_locked(&mut st);
        }
        if let Some(filter) = &self.filter {
            filter.cleanup();
        }
        self.ll.disable();
    }
}
