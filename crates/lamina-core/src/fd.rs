//! 句柄下层：把任意可读写的操作系统句柄变成 [`LowerLayer`]。
//!
//! # 模块定位（Why）
//! - 绝大多数传输（TCP/UDP/串口/管道/子进程）最终都落在"一个句柄 + 就绪
//!   回调"上；本模块把缓冲读取、延迟投递、连接完成判定与安全析构做成
//!   一次，传输驱动只需填 [`FdDriver`] 的钩子。
//! - 安全析构是这里最硬的约束：句柄只允许在宿主确认"不再有在途回调"
//!   （cleared）之后关闭，optional 的 `check_close` 轮询让驱动得以等待
//!   内核侧排空。
//!
//! # 并发模型（How）
//! - 内部状态由自旋锁保护；每条上行路径先在锁内取走需要的快照、落锁后
//!   再进入用户或驱动回调，保证回调期间不持锁；
//! - 读投递以 `in_read` 标志互斥，"读使能 + 缓冲有数据"的组合一律经
//!   延迟执行器重投，杜绝用户调用栈上的重入。

use alloc::{string::String, sync::Arc};
use core::mem;
use core::time::Duration;

use spin::Mutex;

use crate::{
    Result,
    aux::AuxTags,
    buffer::ReadBuf,
    error::{CoreError, codes},
    ll::{ControlData, Done, DoneErr, LlHandler, LowerLayer, OpenResult},
    sealed::Sealed,
    runtime::{
        DeferredRunner, FdHandlers, FdId, OsFuncs, RunnerHandler, SysFd, Timer, TimerHandler,
        WeakCell,
    },
};

const LOG_TARGET: &str = "lamina::fd";

/// 优雅关闭检查的阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosePhase {
    /// 关闭流程刚启动，驱动可以发起排空动作。
    Start,
    /// 监视已清除，轮询内核侧是否排空完毕。
    Done,
}

/// 优雅关闭检查的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCheck {
    /// 可以关闭句柄了。
    Done,
    /// 尚未排空，在指定延迟后再次轮询。
    RetryAfter(Duration),
}

/// 驱动侧打开的结果：句柄与连接是否已就绪。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubOpen {
    /// 句柄已连接可用。
    Open(SysFd),
    /// 连接在途；写/异常就绪时由 `check_open` 判定结果。
    InProgress(SysFd),
}

/// `FdDriver` 是传输驱动向句柄下层提供的钩子集合。
///
/// # 设计背景（Why）
/// - 缺省实现覆盖"普通流式句柄"的全部行为：普通读、散布写、无优雅排空；
///   数据报或带内核缓冲的传输按需覆写对应钩子。
///
/// # 契约说明（What）
/// - `sub_open` / `retry_open`：创建（或换一个地址重建）句柄；
/// - `check_open`：写/异常就绪时判定连接是否成功；
/// - `read` / `write`：字节搬运，缺省直通 [`OsFuncs`]；
/// - `read_ready` / `write_ready` / `except_ready`：返回 `true` 表示驱动
///   完全接管了本次事件（配合 [`FdLl::handle_incoming_with`] 使用）；
/// - `check_close`：优雅关闭检查，缺省立即放行。
pub trait FdDriver: Send + Sync + 'static + Sealed {
    /// 创建句柄并发起连接。
    fn sub_open(&self) -> Result<SubOpen> {
        Err(CoreError::not_supported("driver cannot open"))
    }

    /// 判定在途连接是否成功。
    fn check_open(&self, _fd: SysFd) -> Result<()> {
        Ok(())
    }

    /// 连接失败后换一个目标重试；`None` 表示不支持重试。
    fn retry_open(&self) -> Option<Result<SubOpen>> {
        None
    }

    /// 从句柄读取；缺省直通 [`OsFuncs::fd_read`]。
    fn read(&self, os: &dyn OsFuncs, fd: SysFd, buf: &mut [u8]) -> Result<usize> {
        os.fd_read(fd, buf)
    }

    /// 向句柄写入；缺省直通 [`OsFuncs::fd_write`]。
    fn write(&self, os: &dyn OsFuncs, fd: SysFd, sg: &[&[u8]], _aux: &AuxTags) -> Result<usize> {
        os.fd_write(fd, sg)
    }

    /// 接管读就绪事件；返回 `true` 表示已处理。
    fn read_ready(&self) -> bool {
        false
    }

    /// 接管写就绪事件；返回 `true` 表示已处理。
    fn write_ready(&self) -> bool {
        false
    }

    /// 接管异常就绪事件（连接建立期之外）；返回 `true` 表示已处理。
    fn except_ready(&self) -> bool {
        false
    }

    /// 优雅关闭检查；缺省立即放行。
    fn check_close(&self, _phase: ClosePhase) -> CloseCheck {
        CloseCheck::Done
    }

    /// 对端地址。
    fn remote_addr(&self, _fd: Option<SysFd>) -> Result<String> {
        Err(CoreError::not_supported("remote address not available"))
    }

    /// 对端数值标识。
    fn remote_id(&self, _fd: Option<SysFd>) -> Result<i32> {
        Err(CoreError::not_supported("remote id not available"))
    }

    /// 驱动级控制操作。
    fn control(
        &self,
        _fd: Option<SysFd>,
        _get: bool,
        _option: u32,
        _data: &mut ControlData,
    ) -> Result<()> {
        Err(CoreError::not_supported("control not supported"))
    }
}

/// 句柄下层的构造配置。
///
/// # 契约说明（What）
/// - `max_read_size`：读缓冲容量；0 表示只写模式，读使能永远不会落到
///   监视器上。
#[derive(Clone, Copy, Debug)]
pub struct FdLlConfig {
    pub max_read_size: usize,
    pub write_only: bool,
}

impl Default for FdLlConfig {
    fn default() -> Self {
        Self {
            max_read_size: 4096,
            write_only: false,
        }
    }
}

impl FdLlConfig {
    /// 指定读缓冲容量。
    pub fn with_max_read_size(mut self, size: usize) -> Self {
        self.max_read_size = size;
        self
    }

    /// 切换只写模式。
    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self.max_read_size = 0;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FdState {
    Closed,
    InOpen,
    Open,
    InClose,
}

struct FdInner {
    state: FdState,
    fd: Option<SysFd>,
    fd_id: Option<FdId>,
    write_only: bool,
    read_enabled: bool,
    write_enabled: bool,
    handler: Option<Arc<dyn LlHandler>>,
    read_buf: ReadBuf,
    aux: AuxTags,
    in_read: bool,
    deferred_pending: bool,
    deferred_read: bool,
    deferred_close: bool,
    open_done: Option<DoneErr>,
    open_err: Option<CoreError>,
    close_done: Option<Done>,
}

/// `FdLl` 把一个操作系统句柄实现为 [`LowerLayer`]。
///
/// # 生命周期（What）
/// - 构造时可携带已连接句柄（服务端接入路径，初态即 open）或不带句柄
///   （客户端路径，`open` 时经 [`FdDriver::sub_open`] 创建）；
/// - 关闭序列：`check_close(Start)` → 清除监视 → cleared 确认 →
///   `check_close(Done)` 轮询 → 关闭句柄 → close done；
/// - 句柄恰好关闭一次，且一定发生在宿主确认无在途回调之后。
pub struct FdLl {
    os: Arc<dyn OsFuncs>,
    driver: Arc<dyn FdDriver>,
    close_timer: Mutex<Option<Arc<dyn Timer>>>,
    runner: Mutex<Option<Arc<dyn DeferredRunner>>>,
    watch: Mutex<Option<Arc<FdWatch>>>,
    inner: Mutex<FdInner>,
}

struct FdWatch {
    ll: WeakCell<FdLl>,
}

impl FdHandlers for FdWatch {
    fn read_ready(&self) {
        if let Some(ll) = self.ll.get() {
            ll.on_read_ready();
        }
    }

    fn write_ready(&self) {
        if let Some(ll) = self.ll.get() {
            ll.on_write_ready();
        }
    }

    fn except_ready(&self) {
        if let Some(ll) = self.ll.get() {
            ll.on_except_ready();
        }
    }

    fn cleared(&self) {
        if let Some(ll) = self.ll.get() {
            ll.on_cleared();
        }
    }
}

struct FdCloseTick {
    ll: WeakCell<FdLl>,
}

impl TimerHandler for FdCloseTick {
    fn timeout(&self) {
        if let Some(ll) = self.ll.get() {
            ll.close_check_tick();
        }
    }
}

struct FdDeferred {
    ll: WeakCell<FdLl>,
}

impl RunnerHandler for FdDeferred {
    fn run(&self) {
        if let Some(ll) = self.ll.get() {
            ll.deferred_op();
        }
    }
}

impl FdLl {
    /// 构造句柄下层。
    ///
    /// # 契约说明（What）
    /// - `fd` 为 `Some` 时初态即 open（服务端接入），监视注册立即完成；
    ///   为 `None` 时初态 closed，等待 `open` 驱动 [`FdDriver::sub_open`]。
    pub fn alloc(
        os: Arc<dyn OsFuncs>,
        driver: Arc<dyn FdDriver>,
        fd: Option<SysFd>,
        config: FdLlConfig,
    ) -> Result<Arc<FdLl>> {
        let state = if fd.is_some() {
            FdState::Open
        } else {
            FdState::Closed
        };
        let ll = Arc::new(FdLl {
            os: Arc::clone(&os),
            driver,
            close_timer: Mutex::new(None),
            runner: Mutex::new(None),
            watch: Mutex::new(None),
            inner: Mutex::new(FdInner {
                state,
                fd,
                fd_id: None,
                write_only: config.write_only,
                read_enabled: false,
                write_enabled: false,
                handler: None,
                read_buf: ReadBuf::new(if config.write_only {
                    0
                } else {
                    config.max_read_size
                }),
                aux: AuxTags::empty(),
                in_read: false,
                deferred_pending: false,
                deferred_read: false,
                deferred_close: false,
                open_done: None,
                open_err: None,
                close_done: None,
            }),
        });

        let tick = Arc::new(FdCloseTick { ll: WeakCell::new() });
        tick.ll.bind(&ll);
        let timer = os.alloc_timer(tick)?;
        *ll.close_timer.lock() = Some(timer);

        let deferred = Arc::new(FdDeferred { ll: WeakCell::new() });
        deferred.ll.bind(&ll);
        let runner = os.alloc_runner(deferred)?;
        *ll.runner.lock() = Some(runner);

        let watch = Arc::new(FdWatch { ll: WeakCell::new() });
        watch.ll.bind(&ll);
        *ll.watch.lock() = Some(watch);

        if fd.is_some() {
            let mut st = ll.inner.lock();
            let target = st.fd.expect("fd checked above");
            ll.register_locked(&mut st, target)?;
        }
        Ok(ll)
    }

    /// 供覆写 `read_ready` 的驱动复用标准读投递路径，自带读缓冲与重投逻辑。
    pub fn handle_incoming_with(
        &self,
        aux: AuxTags,
        read: impl FnOnce(&mut [u8]) -> Result<usize>,
    ) {
        self.handle_incoming(aux, read);
    }

    fn runner(&self) -> Arc<dyn DeferredRunner> {
        self.runner
            .lock()
            .clone()
            .expect("runner is bound during alloc")
    }

    fn close_timer(&self) -> Arc<dyn Timer> {
        self.close_timer
            .lock()
            .clone()
            .expect("close timer is bound during alloc")
    }

    fn watch(&self) -> Arc<FdWatch> {
        self.watch
            .lock()
            .clone()
            .expect("watch handlers are bound during alloc")
    }

    fn handler(&self) -> Option<Arc<dyn LlHandler>> {
        self.inner.lock().handler.clone()
    }

    fn register_locked(&self, st: &mut FdInner, fd: SysFd) -> Result<()> {
        let id = self.os.register_fd(fd, self.watch())?;
        st.fd_id = Some(id);
        Ok(())
    }

    fn sched_deferred_locked(&self, st: &mut FdInner) {
        if !st.deferred_pending {
            st.deferred_pending = true;
            let _ = self.runner().schedule();
        }
    }

    /// 读投递循环：消费任意前缀，零消费经延迟执行器重投。
    ///
    /// 调用期间不持内部锁，由 `in_read` 标志保证互斥。
    fn deliver_read_data(&self, err: Option<CoreError>, buf: &mut ReadBuf, aux: &AuxTags) {
        let Some(handler) = self.handler() else {
            buf.clear();
            return;
        };
        loop {
            let count = handler.read(err.clone(), buf.unread(), aux);
            if err.is_some() || count >= buf.len() {
                buf.clear();
                return;
            }
            buf.consume(count);
            if buf.is_empty() {
                return;
            }
            let mut st = self.inner.lock();
            if !st.read_enabled {
                return;
            }
            if count == 0 {
                // 零消费且读仍使能：这是上方的背压信号。改走延迟执行器
                // 重投，而不是原地重试。
                st.deferred_read = true;
                self.sched_deferred_locked(&mut st);
                drop(st);
                self.os.logger().debug(
                    LOG_TARGET,
                    "consumer took zero bytes, re-offering via deferred runner",
                    &[],
                );
                return;
            }
        }
    }

    fn handle_incoming(&self, aux: AuxTags, read: impl FnOnce(&mut [u8]) -> Result<usize>) {
        let mut st = self.inner.lock();
        if let Some(id) = st.fd_id {
            self.os.set_read_enabled(id, false);
            self.os.set_except_enabled(id, false);
        }
        if st.in_read || st.fd.is_none() {
            return;
        }
        st.in_read = true;
        let mut buf = mem::replace(&mut st.read_buf, ReadBuf::new(0));
        st.aux = aux.clone();
        drop(st);

        let mut err = None;
        if buf.is_empty()
            && let Err(read_err) = buf.fill(read)
        {
            err = Some(read_err);
        }
        if err.is_some() || !buf.is_empty() {
            self.deliver_read_data(err, &mut buf, &aux);
        }

        let mut st = self.inner.lock();
        st.read_buf = buf;
        st.in_read = false;
        if st.state == FdState::Open
            && st.read_enabled
            && !st.deferred_read
            && let Some(id) = st.fd_id
        {
            self.os.set_read_enabled(id, true);
            self.os.set_except_enabled(id, true);
        }
    }

    fn on_read_ready(&self) {
        if self.driver.read_ready() {
            return;
        }
        let fd = {
            let st = self.inner.lock();
            match st.fd {
                Some(fd) => fd,
                None => return,
            }
        };
        let driver = Arc::clone(&self.driver);
        let os = Arc::clone(&self.os);
        self.handle_incoming(AuxTags::empty(), move |buf| driver.read(os.as_ref(), fd, buf));
    }

    fn on_write_ready(&self) {
        let st = self.inner.lock();
        let Some(id) = st.fd_id else {
            return;
        };
        self.os.set_write_enabled(id, false);

        if st.state == FdState::InOpen {
            let fd = st.fd.expect("in-open state always has a handle");
            drop(st);
            match self.driver.check_open(fd) {
                Ok(()) => self.finish_open(Ok(())),
                Err(err) => match self.driver.retry_open() {
                    None => self.finish_open(Err(err)),
                    Some(retry) => self.swap_handle_and_retry(retry),
                },
            }
        } else {
            drop(st);
            if self.driver.write_ready() {
                return;
            }
            if let Some(handler) = self.handler() {
                handler.write_ready();
            }
            let st = self.inner.lock();
            if st.state == FdState::Open
                && st.write_enabled
                && let Some(id) = st.fd_id
            {
                self.os.set_write_enabled(id, true);
            }
        }
    }

    /// 连接失败后的换句柄重试：旧句柄静默清除并关闭，新句柄重新注册。
    fn swap_handle_and_retry(&self, retry: Result<SubOpen>) {
        let mut st = self.inner.lock();
        if let Some(old_id) = st.fd_id.take() {
            self.os.clear_fd(old_id, false);
        }
        if let Some(old_fd) = st.fd.take() {
            self.os.fd_close(old_fd);
        }
        match retry {
            Ok(SubOpen::InProgress(fd)) => {
                st.fd = Some(fd);
                match self.register_locked(&mut st, fd) {
                    Ok(()) => {
                        let id = st.fd_id.expect("registered above");
                        self.os.set_write_enabled(id, true);
                        self.os.set_except_enabled(id, true);
                    }
                    Err(err) => {
                        drop(st);
                        self.finish_open(Err(err));
                    }
                }
            }
            Ok(SubOpen::Open(fd)) => {
                st.fd = Some(fd);
                match self.register_locked(&mut st, fd) {
                    Ok(()) => {
                        drop(st);
                        self.finish_open(Ok(()));
                    }
                    Err(err) => {
                        drop(st);
                        self.finish_open(Err(err));
                    }
                }
            }
            Err(err) => {
                drop(st);
                self.finish_open(Err(err));
            }
        }
    }

    fn on_except_ready(&self) {
        let st = self.inner.lock();
        // connect() 失败在部分平台以异常集上报，打开期间按写就绪同路径处理。
        if st.state == FdState::InOpen {
            drop(st);
            self.on_write_ready_from_except();
        } else {
            drop(st);
            let _ = self.driver.except_ready();
        }
    }

    fn on_write_ready_from_except(&self) {
        self.on_write_ready();
    }

    fn finish_open(&self, result: Result<()>) {
        let mut st = self.inner.lock();
        if let Some(id) = st.fd_id {
            self.os.set_except_enabled(id, false);
        }
        match result {
            Err(err) => {
                if st.fd.is_none() {
                    st.state = FdState::Closed;
                    let done = st.open_done.take();
                    drop(st);
                    if let Some(done) = done {
                        done(Err(err));
                    }
                    return;
                }
                st.open_err = Some(err);
                self.start_close_locked(&mut st);
            }
            Ok(()) => {
                st.state = FdState::Open;
                let done = st.open_done.take();
                drop(st);
                if let Some(done) = done {
                    done(Ok(()));
                }
                let st = self.inner.lock();
                if st.state == FdState::Open
                    && let Some(id) = st.fd_id
                {
                    if st.read_enabled {
                        self.os.set_read_enabled(id, true);
                        self.os.set_except_enabled(id, true);
                    }
                    if st.write_enabled {
                        self.os.set_write_enabled(id, true);
                    }
                }
            }
        }
    }

    fn start_close_locked(&self, st: &mut FdInner) {
        // Start 阶段的返回值不驱动定时器，真正的轮询在 cleared 之后。
        let _ = self.driver.check_close(ClosePhase::Start);
        st.state = FdState::InClose;
        if let Some(id) = st.fd_id {
            self.os.clear_fd(id, true);
        }
    }

    fn on_cleared(&self) {
        self.close_check_tick();
    }

    fn close_check_tick(&self) {
        match self.driver.check_close(ClosePhase::Done) {
            CloseCheck::RetryAfter(delay) => {
                let _ = self.close_timer().start(delay);
            }
            CloseCheck::Done => self.finish_cleared(),
        }
    }

    /// 监视清除已确认：关闭句柄恰好一次，补发失败打开的通知，再收尾关闭。
    fn finish_cleared(&self) {
        let mut st = self.inner.lock();
        st.fd_id = None;
        if let Some(fd) = st.fd.take() {
            self.os.fd_close(fd);
        }
        if let Some(done) = st.open_done.take() {
            // 打开失败会从这里收尾。
            let err = st
                .open_err
                .take()
                .unwrap_or_else(|| CoreError::new(codes::TRANSPORT_IO, "open aborted"));
            st.state = FdState::Closed;
            drop(st);
            done(Err(err));
            st = self.inner.lock();
        }
        if st.deferred_pending {
            // 延迟执行器还有一班在途，把关闭通知交接给它。
            st.deferred_close = true;
        } else {
            drop(st);
            self.finish_close();
            return;
        }
    }

    fn finish_close(&self) {
        let mut st = self.inner.lock();
        st.state = FdState::Closed;
        st.read_buf.clear();
        let done = st.close_done.take();
        drop(st);
        if let Some(done) = done {
            done();
        }
    }

    fn deferred_op(&self) {
        let mut st = self.inner.lock();
        if st.deferred_close {
            st.deferred_close = false;
            drop(st);
            self.finish_close();
            st = self.inner.lock();
        }

        if st.deferred_read {
            st.deferred_read = false;
            st.in_read = true;
            let mut buf = mem::replace(&mut st.read_buf, ReadBuf::new(0));
            let aux = st.aux.clone();
            drop(st);
            self.deliver_read_data(None, &mut buf, &aux);
            st = self.inner.lock();
            st.read_buf = buf;
            st.in_read = false;
        }

        st.deferred_pending = false;
        if st.state == FdState::Open
            && let Some(id) = st.fd_id
        {
            let read_on = st.read_enabled && !st.deferred_read;
            self.os.set_read_enabled(id, read_on);
            self.os.set_except_enabled(id, read_on);
            self.os.set_write_enabled(id, st.write_enabled);
        }
        if st.deferred_read || st.deferred_close {
            // 投递期间又积累了新的延迟工作，追加一班。
            self.sched_deferred_locked(&mut st);
        }
    }
}

impl LowerLayer for FdLl {
    fn set_handler(&self, handler: Arc<dyn LlHandler>) {
        self.inner.lock().handler = Some(handler);
    }

    fn write(&self, sg: &[&[u8]], aux: &AuxTags) -> Result<usize> {
        let fd = {
            let st = self.inner.lock();
            st.fd
                .ok_or_else(|| CoreError::not_ready("write on a closed handle"))?
        };
        self.driver.write(self.os.as_ref(), fd, sg, aux)
    }

    fn open(&self, done: DoneErr) -> Result<OpenResult> {
        let mut st = self.inner.lock();
        if st.state != FdState::Closed {
            return Err(CoreError::not_ready("handle is already open"));
        }
        // 状态检查与建句柄在同一次持锁内完成，并发的第二个打开无缝隙可钻。
        let sub = self.driver.sub_open()?;
        match sub {
            SubOpen::Open(fd) => {
                st.fd = Some(fd);
                if let Err(err) = self.register_locked(&mut st, fd) {
                    st.fd = None;
                    self.os.fd_close(fd);
                    return Err(err);
                }
                st.state = FdState::Open;
                Ok(OpenResult::Open)
            }
            SubOpen::InProgress(fd) => {
                st.fd = Some(fd);
                if let Err(err) = self.register_locked(&mut st, fd) {
                    st.fd = None;
                    self.os.fd_close(fd);
                    return Err(err);
                }
                st.state = FdState::InOpen;
                st.open_done = Some(done);
                let id = st.fd_id.expect("registered above");
                self.os.set_write_enabled(id, true);
                self.os.set_except_enabled(id, true);
                Ok(OpenResult::InProgress)
            }
        }
    }

    fn close(&self, done: Done) -> Result<()> {
        let mut st = self.inner.lock();
        match st.state {
            FdState::Open | FdState::InOpen => {
                st.close_done = Some(done);
                self.start_close_locked(&mut st);
                Ok(())
            }
            _ => Err(CoreError::not_ready("close on a handle that is not open")),
        }
    }

    fn set_read_enabled(&self, enabled: bool) {
        let mut st = self.inner.lock();
        if st.write_only {
            return;
        }
        st.read_enabled = enabled;

        if st.in_read || st.state != FdState::Open || (!st.read_buf.is_empty() && !enabled) {
            // 在途投递或打开收尾路径会接手使能调和。
        } else if !st.read_buf.is_empty() {
            // 缓冲里还有数据：经延迟执行器投递，避免在用户调用栈上重入。
            st.in_read = true;
            st.deferred_read = true;
            self.sched_deferred_locked(&mut st);
        } else if let Some(id) = st.fd_id {
            self.os.set_read_enabled(id, enabled);
            self.os.set_except_enabled(id, enabled);
        }
    }

    fn set_write_enabled(&self, enabled: bool) {
        let mut st = self.inner.lock();
        st.write_enabled = enabled;
        // 打开期间写监视属于连接完成判定，不受用户使能影响。
        if st.state == FdState::Open
            && let Some(id) = st.fd_id
        {
            self.os.set_write_enabled(id, enabled);
        }
    }

    fn remote_addr(&self) -> Result<String> {
        let fd = self.inner.lock().fd;
        self.driver.remote_addr(fd)
    }

    fn remote_id(&self) -> Result<i32> {
        let fd = self.inner.lock().fd;
        self.driver.remote_id(fd)
    }

    fn control(&self, get: bool, option: u32, data: &mut ControlData) -> Result<()> {
        let fd = self.inner.lock().fd;
        self.driver.control(fd, get, option, data)
    }

    fn disable(&self) {
        let mut st = self.inner.lock();
        st.state = FdState::Closed;
        st.open_done = None;
        st.close_done = None;
        st.open_err = None;
        if let Some(id) = st.fd_id.take() {
            self.os.clear_fd(id, false);
        }
        if let Some(fd) = st.fd.take() {
            self.os.fd_close(fd);
        }
    }
}

impl Drop for FdLl {
    fn drop(&mut self) {
        // 最后一个引用释放时仍持有句柄，按硬停路径静默回收。
        let st = self.inner.get_mut();
        if let Some(id) = st.fd_id.take() {
            self.os.clear_fd(id, false);
        }
        if let Some(fd) = st.fd.take() {
            self.os.fd_close(fd);
        }
    }
}
