//! 确定性事件循环：以虚拟时钟与内存管道承载整个栈的测试。
//!
//! # 设计背景（Why）
//! - 栈运行时的全部难点（重入、延迟投递、清除确认、优雅关闭轮询）都
//!   依赖事件循环的时序；用真实套接字与 sleep 写测试既慢又不稳定。
//!   本运行时把时间与就绪全部虚拟化：`step` 一次只推进一件事，
//!   `advance` 拨动虚拟时钟，测试得以精确断言每一步。
//!
//! # 契约说明（What）
//! - 完整实现 [`OsFuncs`]；`clear_fd(.., true)` 的 cleared 通知排在队列
//!   尾部，保证先于它的在途分发全部退栈——与真实宿主的承诺一致；
//! - 管道对 `pipe()` 创建的两端互为对端：写入一端，另一端变为可读；
//!   `set_write_limit` 可以制造短写。

use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use spin::Mutex;

use crate::{
    Result,
    error::{CoreError, codes},
    observability::{Logger, NoopLogger},
    runtime::{
        DeferredRunner, FdHandlers, FdId, MonotonicTimePoint, OsFuncs, RunnerHandler, SysFd, Timer,
        TimerHandler, WeakCell,
    },
};

struct FdReg {
    fd: i32,
    handlers: Arc<dyn FdHandlers>,
    read_enabled: bool,
    write_enabled: bool,
    except_enabled: bool,
    active: bool,
}

struct PipeState {
    peer: i32,
    incoming: VecDeque<u8>,
    closed: bool,
    peer_closed: bool,
    eof_reported: bool,
    write_limit: Option<usize>,
}

struct RtInner {
    now: MonotonicTimePoint,
    run_queue: VecDeque<Arc<StubRunner>>,
    done_queue: VecDeque<Box<dyn FnOnce() + Send>>,
    cleared_queue: VecDeque<u64>,
    timers: Vec<Arc<StubTimer>>,
    fds: BTreeMap<u64, FdReg>,
    pipes: BTreeMap<i32, PipeState>,
    next_fd: i32,
    next_id: u64,
}

/// 确定性测试运行时。
pub struct LoopRuntime {
    inner: Mutex<RtInner>,
    logger: NoopLogger,
    self_ref: WeakCell<LoopRuntime>,
}

struct StubRunner {
    rt: WeakCell<LoopRuntime>,
    handler: Arc<dyn RunnerHandler>,
    pending: AtomicBool,
    self_ref: WeakCell<StubRunner>,
}

impl DeferredRunner for StubRunner {
    fn schedule(&self) -> Result<()> {
        if self.pending.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let rt = self
            .rt
            .get()
            .ok_or_else(|| CoreError::new(codes::RUNTIME_SHUTDOWN, "loop runtime is gone"))?;
        let me = self
            .self_ref
            .get()
            .ok_or_else(|| CoreError::new(codes::RUNTIME_SHUTDOWN, "runner is gone"))?;
        rt.inner.lock().run_queue.push_back(me);
        Ok(())
    }
}

struct TimerSt {
    deadline: Option<MonotonicTimePoint>,
    firing: bool,
    stop_done: Option<Box<dyn FnOnce() + Send>>,
}

struct StubTimer {
    rt: WeakCell<LoopRuntime>,
    handler: Arc<dyn TimerHandler>,
    state: Mutex<TimerSt>,
}

impl Timer for StubTimer {
    fn start(&self, delay: Duration) -> Result<()> {
        let rt = self
            .rt
            .get()
            .ok_or_else(|| CoreError::new(codes::RUNTIME_SHUTDOWN, "loop runtime is gone"))?;
        let now = rt.now();
        let mut st = self.state.lock();
        if st.deadline.is_some() || st.firing {
            return Err(CoreError::new(codes::IN_USE, "timer is already running"));
        }
        st.deadline = Some(now.saturating_add(delay));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.deadline.take().is_some() {
            Ok(())
        } else {
            Err(CoreError::new(codes::TIMER_NOT_RUNNING, "timer is idle"))
        }
    }

    fn stop_with_done(&self, done: Box<dyn FnOnce() + Send>) -> Result<()> {
        let mut st = self.state.lock();
        if st.deadline.take().is_some() {
            drop(st);
            if let Some(rt) = self.rt.get() {
                rt.inner.lock().done_queue.push_back(done);
            }
            Ok(())
        } else if st.firing {
            // 正在触发中：等到期回调退栈后再执行 done。
            st.stop_done = Some(done);
            Ok(())
        } else {
            Err(CoreError::new(codes::TIMER_NOT_RUNNING, "timer is idle"))
        }
    }
}

impl LoopRuntime {
    pub fn new() -> Arc<LoopRuntime> {
        let rt = Arc::new(LoopRuntime {
            inner: Mutex::new(RtInner {
                now: MonotonicTimePoint::ZERO,
                run_queue: VecDeque::new(),
                done_queue: VecDeque::new(),
                cleared_queue: VecDeque::new(),
                timers: Vec::new(),
                fds: BTreeMap::new(),
                pipes: BTreeMap::new(),
                next_fd: 100,
                next_id: 1,
            }),
            logger: NoopLogger,
            self_ref: WeakCell::new(),
        });
        rt.self_ref.bind(&rt);
        rt
    }

    /// 创建一对互联的内存管道端，返回两端句柄。
    pub fn pipe(&self) -> (SysFd, SysFd) {
        let mut inner = self.inner.lock();
        let a = inner.next_fd;
        let b = inner.next_fd + 1;
        inner.next_fd += 2;
        inner.pipes.insert(
            a,
            PipeState {
                peer: b,
                incoming: VecDeque::new(),
                closed: false,
                peer_closed: false,
                eof_reported: false,
                write_limit: None,
            },
        );
        inner.pipes.insert(
            b,
            PipeState {
                peer: a,
                incoming: VecDeque::new(),
                closed: false,
                peer_closed: false,
                eof_reported: false,
                write_limit: None,
            },
        );
        (SysFd(a), SysFd(b))
    }

    /// 限制某端单次 `fd_write` 接受的字节数，用于制造短写。
    pub fn set_write_limit(&self, fd: SysFd, limit: Option<usize>) {
        if let Some(pipe) = self.inner.lock().pipes.get_mut(&fd.0) {
            pipe.write_limit = limit;
        }
    }

    /// 某端当前积压的待读字节数。
    pub fn incoming_len(&self, fd: SysFd) -> usize {
        self.inner
            .lock()
            .pipes
            .get(&fd.0)
            .map(|pipe| pipe.incoming.len())
            .unwrap_or(0)
    }

    /// 直接读走某端收到的全部字节（绕过句柄下层，供裸管道断言用）。
    pub fn drain_incoming(&self, fd: SysFd) -> Vec<u8> {
        match self.inner.lock().pipes.get_mut(&fd.0) {
            Some(pipe) => pipe.incoming.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// 向某端直接注入待读数据（绕过对端写路径）。
    pub fn inject_incoming(&self, fd: SysFd, data: &[u8]) {
        if let Some(pipe) = self.inner.lock().pipes.get_mut(&fd.0) {
            pipe.incoming.extend(data.iter().copied());
        }
    }

    /// 推进一件事；无事可做时返回 `false`。
    ///
    /// 处理顺序：done 回调 → 延迟执行器 → cleared 通知 → 到期定时器 →
    /// 句柄事件。每次只分发一件，分发期间不持内部锁。
    pub fn step(&self) -> bool {
        // done 回调
        let done = self.inner.lock().done_queue.pop_front();
        if let Some(done) = done {
            done();
            return true;
        }

        // 延迟执行器
        let runner = self.inner.lock().run_queue.pop_front();
        if let Some(runner) = runner {
            runner.pending.store(false, Ordering::SeqCst);
            runner.handler.run();
            return true;
        }

        // cleared 通知：此刻先于它的分发均已退栈
        let cleared = {
            let mut inner = self.inner.lock();
            match inner.cleared_queue.pop_front() {
                Some(id) => inner.fds.remove(&id).map(|reg| reg.handlers),
                None => None,
            }
        };
        if let Some(handlers) = cleared {
            handlers.cleared();
            return true;
        }

        // 到期定时器
        let due = {
            let inner = self.inner.lock();
            let now = inner.now;
            inner
                .timers
                .iter()
                .find(|timer| {
                    let st = timer.state.lock();
                    st.deadline.map(|d| d <= now).unwrap_or(false)
                })
                .cloned()
        };
        if let Some(timer) = due {
            {
                let mut st = timer.state.lock();
                st.deadline = None;
                st.firing = true;
            }
            timer.handler.timeout();
            let stop_done = {
                let mut st = timer.state.lock();
                st.firing = false;
                st.stop_done.take()
            };
            if let Some(done) = stop_done {
                self.inner.lock().done_queue.push_back(done);
            }
            return true;
        }

        // 句柄事件
        enum Dispatch {
            Read(Arc<dyn FdHandlers>),
            Write(Arc<dyn FdHandlers>),
        }
        let dispatch = {
            let inner = self.inner.lock();
            let mut found = None;
            for reg in inner.fds.values() {
                if !reg.active {
                    continue;
                }
                let Some(pipe) = inner.pipes.get(&reg.fd) else {
                    continue;
                };
                let readable =
                    !pipe.incoming.is_empty() || (pipe.peer_closed && !pipe.eof_reported);
                if (reg.read_enabled || reg.except_enabled) && readable {
                    found = Some(Dispatch::Read(Arc::clone(&reg.handlers)));
                    break;
                }
                if reg.write_enabled && !pipe.closed {
                    found = Some(Dispatch::Write(Arc::clone(&reg.handlers)));
                    break;
                }
            }
            found
        };
        match dispatch {
            Some(Dispatch::Read(handlers)) => {
                handlers.read_ready();
                true
            }
            Some(Dispatch::Write(handlers)) => {
                handlers.write_ready();
                true
            }
            None => false,
        }
    }

    /// 反复 `step` 直到静默；超过步数上限视为活锁，直接 panic。
    pub fn run_until_idle(&self) {
        let mut steps = 0usize;
        while self.step() {
            steps += 1;
            assert!(steps < 100_000, "loop runtime livelocked after {steps} steps");
        }
    }

    /// 拨动虚拟时钟并跑到静默。
    pub fn advance(&self, delta: Duration) {
        {
            let mut inner = self.inner.lock();
            inner.now = inner.now.saturating_add(delta);
        }
        self.run_until_idle();
    }
}

impl OsFuncs for LoopRuntime {
    fn now(&self) -> MonotonicTimePoint {
        self.inner.lock().now
    }

    fn alloc_timer(&self, handler: Arc<dyn TimerHandler>) -> Result<Arc<dyn Timer>> {
        let timer = Arc::new(StubTimer {
            rt: self.self_ref_cell(),
            handler,
            state: Mutex::new(TimerSt {
                deadline: None,
                firing: false,
                stop_done: None,
            }),
        });
        self.inner.lock().timers.push(Arc::clone(&timer));
        Ok(timer)
    }

    fn alloc_runner(&self, handler: Arc<dyn RunnerHandler>) -> Result<Arc<dyn DeferredRunner>> {
        let runner = Arc::new(StubRunner {
            rt: self.self_ref_cell(),
            handler,
            pending: AtomicBool::new(false),
            self_ref: WeakCell::new(),
        });
        runner.self_ref.bind(&runner);
        Ok(runner)
    }

    fn register_fd(&self, fd: SysFd, handlers: Arc<dyn FdHandlers>) -> Result<FdId> {
        let mut inner = self.inner.lock();
        if !inner.pipes.contains_key(&fd.0) {
            return Err(CoreError::new(
                codes::INVALID_ARGUMENT,
                "unknown fd registered",
            ));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.fds.insert(
            id,
            FdReg {
                fd: fd.0,
                handlers,
                read_enabled: false,
                write_enabled: false,
                except_enabled: false,
                active: true,
            },
        );
        Ok(FdId(id))
    }

    fn set_read_enabled(&self, id: FdId, enabled: bool) {
        if let Some(reg) = self.inner.lock().fds.get_mut(&id.0) {
            reg.read_enabled = enabled;
        }
    }

    fn set_write_enabled(&self, id: FdId, enabled: bool) {
        if let Some(reg) = self.inner.lock().fds.get_mut(&id.0) {
            reg.write_enabled = enabled;
        }
    }

    fn set_except_enabled(&self, id: FdId, enabled: bool) {
        if let Some(reg) = self.inner.lock().fds.get_mut(&id.0) {
            reg.except_enabled = enabled;
        }
    }

    fn clear_fd(&self, id: FdId, report: bool) {
        let mut inner = self.inner.lock();
        if report {
            if let Some(reg) = inner.fds.get_mut(&id.0) {
                reg.active = false;
                inner.cleared_queue.push_back(id.0);
            }
        } else {
            inner.fds.remove(&id.0);
        }
    }

    fn fd_read(&self, fd: SysFd, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let Some(pipe) = inner.pipes.get_mut(&fd.0) else {
            return Err(CoreError::new(codes::INVALID_ARGUMENT, "unknown fd"));
        };
        if pipe.closed {
            return Err(CoreError::not_ready("read on a closed fd"));
        }
        if pipe.incoming.is_empty() {
            if pipe.peer_closed {
                pipe.eof_reported = true;
                return Err(CoreError::remote_closed());
            }
            return Ok(0);
        }
        let mut count = 0;
        while count < buf.len() {
            match pipe.incoming.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn fd_write(&self, fd: SysFd, sg: &[&[u8]]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let Some(pipe) = inner.pipes.get(&fd.0) else {
            return Err(CoreError::new(codes::INVALID_ARGUMENT, "unknown fd"));
        };
        if pipe.closed {
            return Err(CoreError::not_ready("write on a closed fd"));
        }
        if pipe.peer_closed {
            return Err(CoreError::new(codes::TRANSPORT_IO, "peer end is closed"));
        }
        let peer = pipe.peer;
        let budget = pipe.write_limit.unwrap_or(usize::MAX);
        let peer_pipe = inner
            .pipes
            .get_mut(&peer)
            .expect("pipe peers are created in pairs");
        let mut written = 0;
        'outer: for chunk in sg {
            for byte in chunk.iter() {
                if written >= budget {
                    break 'outer;
                }
                peer_pipe.incoming.push_back(*byte);
                written += 1;
            }
        }
        Ok(written)
    }

    fn fd_close(&self, fd: SysFd) {
        let mut inner = self.inner.lock();
        let peer = match inner.pipes.get_mut(&fd.0) {
            Some(pipe) => {
                pipe.closed = true;
                Some(pipe.peer)
            }
            None => None,
        };
        if let Some(peer) = peer
            && let Some(peer_pipe) = inner.pipes.get_mut(&peer)
        {
            peer_pipe.peer_closed = true;
        }
    }

    fn logger(&self) -> &dyn Logger {
        &self.logger
    }
}

impl LoopRuntime {
    fn self_ref_cell(&self) -> WeakCell<LoopRuntime> {
        let cell = WeakCell::new();
        if let Some(me) = self.self_ref.get() {
            cell.bind(&me);
        }
        cell
    }
}

/// 便捷转换：测试里常要把具体运行时当作 `Arc<dyn OsFuncs>` 传递。
pub fn as_os_funcs(rt: &Arc<LoopRuntime>) -> Arc<dyn OsFuncs> {
    Arc::clone(rt) as Arc<dyn OsFuncs>
}
