//! 基于 `mio` 轮询循环的 lamina 运行时适配器。
//!
//! # 定位（Why）
//! - `lamina-core` 只定义 [`OsFuncs`] 消费接口；生产部署需要一个真实的
//!   就绪事件循环。本适配器用 `mio::Poll` 在专用线程上承载全部上行回调：
//!   句柄读/写/异常就绪、定时器到期、延迟执行与清除确认。
//! - 关键承诺与核心契约一一对应：所有回调串行发生在循环线程上；
//!   `clear_fd(.., true)` 的 cleared 通知排在当轮分发之后，先于它的
//!   在途回调必然已退栈。
//!
//! # 结构（How）
//! - 循环线程独占 `mio::Poll`；其余线程经 `Registry` 克隆注册句柄，经
//!   `mio::Waker` 唤醒循环重新计算超时；
//! - 定时器集中在一张表上，轮询超时取最近截止；`stop_with_done` 在
//!   触发中的定时器上挂接 done，由循环在到期回调退栈后补发；
//! - 字节级读写用 `libc`（`read`/`writev`/`close`），`EAGAIN` 映射为
//!   "暂无数据/零写入"，EOF 映射为 `endpoint.remote_closed`。

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use lamina_core::Result;
use lamina_core::error::{CoreError, codes};
use lamina_core::observability::{LogRecord, LogSeverity, Logger};
use lamina_core::runtime::{
    DeferredRunner, FdHandlers, FdId, MonotonicTimePoint, OsFuncs, RunnerHandler, SysFd, Timer,
    TimerHandler,
};

const WAKE_TOKEN: Token = Token(0);
const FIRST_FD_TOKEN: usize = 1;

struct FdEntry {
    fd: i32,
    handlers: Arc<dyn FdHandlers>,
    read_enabled: bool,
    write_enabled: bool,
    except_enabled: bool,
    registered: bool,
    active: bool,
}

struct TimerSt {
    deadline: Option<Instant>,
    firing: bool,
    stop_done: Option<Box<dyn FnOnce() + Send>>,
}

struct MioTimer {
    rt: std::sync::Weak<MioRuntime>,
    handler: Arc<dyn TimerHandler>,
    st: Mutex<TimerSt>,
}

impl Timer for MioTimer {
    fn start(&self, delay: Duration) -> Result<()> {
        let rt = self
            .rt
            .upgrade()
            .ok_or_else(|| CoreError::new(codes::RUNTIME_SHUTDOWN, "runtime is gone"))?;
        {
            let mut st = self.st.lock();
            if st.deadline.is_some() || st.firing {
                return Err(CoreError::new(codes::IN_USE, "timer is already running"));
            }
            st.deadline = Some(Instant::now() + delay);
        }
        rt.wake();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut st = self.st.lock();
        if st.deadline.take().is_some() {
            Ok(())
        } else {
            Err(CoreError::new(codes::TIMER_NOT_RUNNING, "timer is idle"))
        }
    }

    fn stop_with_done(&self, done: Box<dyn FnOnce() + Send>) -> Result<()> {
        let rt = self.rt.upgrade();
        let mut st = self.st.lock();
        if st.deadline.take().is_some() {
            drop(st);
            if let Some(rt) = rt {
                rt.state.lock().done_queue.push_back(done);
                rt.wake();
            }
            Ok(())
        } else if st.firing {
            // 正在触发中：循环在到期回调退栈后补发 done。
            st.stop_done = Some(done);
            Ok(())
        } else {
            Err(CoreError::new(codes::TIMER_NOT_RUNNING, "timer is idle"))
        }
    }
}

struct MioRunner {
    rt: std::sync::Weak<MioRuntime>,
    handler: Arc<dyn RunnerHandler>,
    pending: AtomicBool,
    self_ref: Mutex<std::sync::Weak<MioRunner>>,
}

impl DeferredRunner for MioRunner {
    fn schedule(&self) -> Result<()> {
        if self.pending.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let rt = self
            .rt
            .upgrade()
            .ok_or_else(|| CoreError::new(codes::RUNTIME_SHUTDOWN, "runtime is gone"))?;
        let me = self
            .self_ref
            .lock()
            .upgrade()
            .ok_or_else(|| CoreError::new(codes::RUNTIME_SHUTDOWN, "runner is gone"))?;
        rt.state.lock().run_queue.push_back(me);
        rt.wake();
        Ok(())
    }
}

struct LoopState {
    run_queue: VecDeque<Arc<MioRunner>>,
    done_queue: VecDeque<Box<dyn FnOnce() + Send>>,
    cleared_queue: VecDeque<Arc<dyn FdHandlers>>,
    timers: Vec<Arc<MioTimer>>,
    fds: HashMap<usize, FdEntry>,
    next_token: usize,
    shutdown: bool,
}

/// `mio` 事件循环运行时。
///
/// # 契约说明（What）
/// - [`MioRuntime::spawn`] 创建循环线程并返回共享句柄；
/// - [`MioRuntime::shutdown`] 停止循环并合入线程，幂等；
/// - 其余能力经 [`OsFuncs`] 暴露，语义与核心契约一致。
pub struct MioRuntime {
    state: Mutex<LoopState>,
    registry: Registry,
    waker: Waker,
    start: Instant,
    logger: TracingLogger,
    thread: Mutex<Option<JoinHandle<()>>>,
    self_ref: Mutex<std::sync::Weak<MioRuntime>>,
}

impl MioRuntime {
    /// 创建事件循环并在专用线程上启动。
    pub fn spawn() -> io::Result<Arc<MioRuntime>> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let registry = poll.registry().try_clone()?;
        let rt = Arc::new(MioRuntime {
            state: Mutex::new(LoopState {
                run_queue: VecDeque::new(),
                done_queue: VecDeque::new(),
                cleared_queue: VecDeque::new(),
                timers: Vec::new(),
                fds: HashMap::new(),
                next_token: FIRST_FD_TOKEN,
                shutdown: false,
            }),
            registry,
            waker,
            start: Instant::now(),
            logger: TracingLogger,
            thread: Mutex::new(None),
            self_ref: Mutex::new(std::sync::Weak::new()),
        });
        *rt.self_ref.lock() = Arc::downgrade(&rt);

        let loop_rt = Arc::clone(&rt);
        let handle = std::thread::Builder::new()
            .name("lamina-loop".into())
            .spawn(move || loop_rt.run_loop(poll))?;
        *rt.thread.lock() = Some(handle);
        Ok(rt)
    }

    /// 停止循环并等待线程退出；幂等。
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.wake();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn wake(&self) {
        let _ = self.waker.wake();
    }

    fn run_loop(self: Arc<Self>, mut poll: Poll) {
        let mut events = Events::with_capacity(128);
        loop {
            let timeout = {
                let state = self.state.lock();
                if state.shutdown {
                    break;
                }
                if !state.run_queue.is_empty()
                    || !state.done_queue.is_empty()
                    || !state.cleared_queue.is_empty()
                {
                    Some(Duration::ZERO)
                } else {
                    let now = Instant::now();
                    state
                        .timers
                        .iter()
                        .filter_map(|timer| timer.st.lock().deadline)
                        .map(|deadline| deadline.saturating_duration_since(now))
                        .min()
                }
            };

            match poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(error = %err, "poll failed, stopping loop");
                    break;
                }
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                self.dispatch_fd_event(
                    event.token().0,
                    event.is_readable() || event.is_read_closed(),
                    event.is_writable(),
                    event.is_priority() || event.is_error(),
                );
            }

            self.drain_queues();
            self.fire_due_timers();
        }
        // 关停路径：把尚未送出的清除确认补完，调用方的析构得以收尾。
        self.drain_queues();
    }

    fn dispatch_fd_event(&self, token: usize, readable: bool, writable: bool, except: bool) {
        let snapshot = {
            let state = self.state.lock();
            state.fds.get(&token).and_then(|entry| {
                if !entry.active {
                    return None;
                }
                Some((
                    Arc::clone(&entry.handlers),
                    entry.read_enabled,
                    entry.write_enabled,
                    entry.except_enabled,
                ))
            })
        };
        let Some((handlers, read_en, write_en, except_en)) = snapshot else {
            return;
        };
        if except && except_en {
            handlers.except_ready();
        }
        if readable && read_en {
            handlers.read_ready();
        }
        if writable && write_en {
            handlers.write_ready();
        }
    }

    /// 依次清空 done 回调、延迟执行器与 cleared 通知。
    ///
    /// cleared 排在最后：此刻当轮的句柄分发已经全部退栈。
    fn drain_queues(&self) {
        loop {
            let job = {
                let mut state = self.state.lock();
                if let Some(done) = state.done_queue.pop_front() {
                    Some(QueueJob::Done(done))
                } else if let Some(runner) = state.run_queue.pop_front() {
                    Some(QueueJob::Runner(runner))
                } else if let Some(handlers) = state.cleared_queue.pop_front() {
                    Some(QueueJob::Cleared(handlers))
                } else {
                    None
                }
            };
            match job {
                Some(QueueJob::Done(done)) => done(),
                Some(QueueJob::Runner(runner)) => {
                    runner.pending.store(false, Ordering::SeqCst);
                    runner.handler.run();
                }
                Some(QueueJob::Cleared(handlers)) => handlers.cleared(),
                None => return,
            }
        }
    }

    fn fire_due_timers(&self) {
        loop {
            let due = {
                let state = self.state.lock();
                let now = Instant::now();
                state
                    .timers
                    .iter()
                    .find(|timer| {
                        let st = timer.st.lock();
                        st.deadline.map(|d| d <= now).unwrap_or(false)
                    })
                    .cloned()
            };
            let Some(timer) = due else {
                return;
            };
            {
                let mut st = timer.st.lock();
                st.deadline = None;
                st.firing = true;
            }
            timer.handler.timeout();
            let stop_done = {
                let mut st = timer.st.lock();
                st.firing = false;
                st.stop_done.take()
            };
            if let Some(done) = stop_done {
                self.state.lock().done_queue.push_back(done);
            }
        }
    }

    fn interests(read: bool, write: bool, except: bool) -> Option<Interest> {
        let mut interest: Option<Interest> = None;
        if read || except {
            interest = Some(Interest::READABLE);
        }
        if write {
            interest = Some(match interest {
                Some(existing) => existing | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }
        interest
    }

    /// 使能位变化后与 `mio` 的注册状态调和。
    fn reconcile(&self, token: usize) {
        let mut state = self.state.lock();
        let Some(entry) = state.fds.get_mut(&token) else {
            return;
        };
        if !entry.active {
            return;
        }
        let wanted = Self::interests(entry.read_enabled, entry.write_enabled, entry.except_enabled);
        let fd = entry.fd;
        let registered = entry.registered;
        match (registered, wanted) {
            (false, Some(interest)) => {
                if self
                    .registry
                    .register(&mut SourceFd(&fd), Token(token), interest)
                    .is_ok()
                {
                    entry.registered = true;
                }
            }
            (true, Some(interest)) => {
                let _ = self
                    .registry
                    .reregister(&mut SourceFd(&fd), Token(token), interest);
            }
            (true, None) => {
                let _ = self.registry.deregister(&mut SourceFd(&fd));
                entry.registered = false;
            }
            (false, None) => {}
        }
        drop(state);
        self.wake();
    }
}

enum QueueJob {
    Done(Box<dyn FnOnce() + Send>),
    Runner(Arc<MioRunner>),
    Cleared(Arc<dyn FdHandlers>),
}

impl OsFuncs for MioRuntime {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint::from_offset(self.start.elapsed())
    }

    fn alloc_timer(&self, handler: Arc<dyn TimerHandler>) -> Result<Arc<dyn Timer>> {
        let timer = Arc::new(MioTimer {
            rt: self.self_ref.lock().clone(),
            handler,
            st: Mutex::new(TimerSt {
                deadline: None,
                firing: false,
                stop_done: None,
            }),
        });
        self.state.lock().timers.push(Arc::clone(&timer));
        Ok(timer)
    }

    fn alloc_runner(&self, handler: Arc<dyn RunnerHandler>) -> Result<Arc<dyn DeferredRunner>> {
        let runner = Arc::new(MioRunner {
            rt: self.self_ref.lock().clone(),
            handler,
            pending: AtomicBool::new(false),
            self_ref: Mutex::new(std::sync::Weak::new()),
        });
        *runner.self_ref.lock() = Arc::downgrade(&runner);
        Ok(runner)
    }

    fn register_fd(&self, fd: SysFd, handlers: Arc<dyn FdHandlers>) -> Result<FdId> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(CoreError::new(
                codes::RUNTIME_SHUTDOWN,
                "runtime is shutting down",
            ));
        }
        let token = state.next_token;
        state.next_token += 1;
        state.fds.insert(
            token,
            FdEntry {
                fd: fd.0,
                handlers,
                read_enabled: false,
                write_enabled: false,
                except_enabled: false,
                registered: false,
                active: true,
            },
        );
        Ok(FdId(token as u64))
    }

    fn set_read_enabled(&self, id: FdId, enabled: bool) {
        let token = id.0 as usize;
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.fds.get_mut(&token) {
                entry.read_enabled = enabled;
            } else {
                return;
            }
        }
        self.reconcile(token);
    }

    fn set_write_enabled(&self, id: FdId, enabled: bool) {
        let token = id.0 as usize;
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.fds.get_mut(&token) {
                entry.write_enabled = enabled;
            } else {
                return;
            }
        }
        self.reconcile(token);
    }

    fn set_except_enabled(&self, id: FdId, enabled: bool) {
        let token = id.0 as usize;
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.fds.get_mut(&token) {
                entry.except_enabled = enabled;
            } else {
                return;
            }
        }
        self.reconcile(token);
    }

    fn clear_fd(&self, id: FdId, report: bool) {
        let token = id.0 as usize;
        let mut state = self.state.lock();
        let Some(mut entry) = state.fds.remove(&token) else {
            return;
        };
        if entry.registered {
            let _ = self.registry.deregister(&mut SourceFd(&entry.fd));
            entry.registered = false;
        }
        if report {
            state.cleared_queue.push_back(entry.handlers);
        }
        drop(state);
        self.wake();
    }

    fn fd_read(&self, fd: SysFd, buf: &mut [u8]) -> Result<usize> {
        loop {
            let n = unsafe { libc::read(fd.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n > 0 {
                return Ok(n as usize);
            }
            if n == 0 {
                return Err(CoreError::remote_closed());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                _ => {
                    return Err(CoreError::new(codes::TRANSPORT_IO, "read failed")
                        .with_cause(err.to_string()));
                }
            }
        }
    }

    fn fd_write(&self, fd: SysFd, sg: &[&[u8]]) -> Result<usize> {
        let iovecs: Vec<libc::iovec> = sg
            .iter()
            .map(|chunk| libc::iovec {
                iov_base: chunk.as_ptr() as *mut libc::c_void,
                iov_len: chunk.len(),
            })
            .collect();
        loop {
            let n = unsafe { libc::writev(fd.0, iovecs.as_ptr(), iovecs.len() as libc::c_int) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                io::ErrorKind::BrokenPipe => {
                    return Err(CoreError::remote_closed());
                }
                _ => {
                    return Err(CoreError::new(codes::TRANSPORT_IO, "write failed")
                        .with_cause(err.to_string()));
                }
            }
        }
    }

    fn fd_close(&self, fd: SysFd) {
        let _ = unsafe { libc::close(fd.0) };
    }

    fn logger(&self) -> &dyn Logger {
        &self.logger
    }
}

impl Drop for MioRuntime {
    fn drop(&mut self) {
        self.state.lock().shutdown = true;
        let _ = self.waker.wake();
    }
}

/// 把核心 Logger 桥接到 `tracing`。
///
/// 字段折叠为 `key=value` 文本附在消息后；目标以 `lamina_target` 字段
/// 保留（`tracing` 的 target 须为编译期常量）。
struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        let mut rendered = String::from(record.message);
        for (key, value) in record.fields {
            let _ = write!(rendered, " {key}={value}");
        }
        match record.severity {
            LogSeverity::Trace => {
                tracing::trace!(lamina_target = record.target, "{rendered}");
            }
            LogSeverity::Debug => {
                tracing::debug!(lamina_target = record.target, "{rendered}");
            }
            LogSeverity::Info => {
                tracing::info!(lamina_target = record.target, "{rendered}");
            }
            LogSeverity::Warn => {
                tracing::warn!(lamina_target = record.target, "{rendered}");
            }
            LogSeverity::Error => {
                tracing::error!(lamina_target = record.target, "{rendered}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct SignalRunner {
        tx: Mutex<mpsc::Sender<&'static str>>,
    }

    impl RunnerHandler for SignalRunner {
        fn run(&self) {
            let _ = self.tx.lock().send("ran");
        }
    }

    struct SignalTimer {
        tx: Mutex<mpsc::Sender<&'static str>>,
    }

    impl TimerHandler for SignalTimer {
        fn timeout(&self) {
            let _ = self.tx.lock().send("fired");
        }
    }

    struct SignalFd {
        tx: Mutex<mpsc::Sender<&'static str>>,
    }

    impl FdHandlers for SignalFd {
        fn read_ready(&self) {
            let _ = self.tx.lock().send("readable");
        }

        fn write_ready(&self) {}

        fn except_ready(&self) {}

        fn cleared(&self) {
            let _ = self.tx.lock().send("cleared");
        }
    }

    fn unix_pipe() -> (SysFd, SysFd) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe(2) 创建失败");
        for fd in fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        (SysFd(fds[0]), SysFd(fds[1]))
    }

    #[test]
    fn deferred_runner_executes_on_loop_thread() {
        let rt = MioRuntime::spawn().unwrap();
        let (tx, rx) = mpsc::channel();
        let runner = rt
            .alloc_runner(Arc::new(SignalRunner { tx: Mutex::new(tx) }))
            .unwrap();
        runner.schedule().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "ran");
        rt.shutdown();
    }

    #[test]
    fn timer_fires_and_idle_stop_is_rejected() {
        let rt = MioRuntime::spawn().unwrap();
        let (tx, rx) = mpsc::channel();
        let timer = rt
            .alloc_timer(Arc::new(SignalTimer { tx: Mutex::new(tx) }))
            .unwrap();
        assert_eq!(
            timer.stop().unwrap_err().code(),
            codes::TIMER_NOT_RUNNING,
            "空闲定时器的 stop 必须拒绝"
        );
        timer.start(Duration::from_millis(20)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fired");
        rt.shutdown();
    }

    #[test]
    fn fd_readiness_and_cleared_confirmation() {
        let rt = MioRuntime::spawn().unwrap();
        let (read_end, write_end) = unix_pipe();
        let (tx, rx) = mpsc::channel();
        let id = rt
            .register_fd(read_end, Arc::new(SignalFd { tx: Mutex::new(tx) }))
            .unwrap();
        rt.set_read_enabled(id, true);

        assert_eq!(rt.fd_write(write_end, &[b"x"]).unwrap(), 1);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "readable"
        );

        rt.set_read_enabled(id, false);
        rt.clear_fd(id, true);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "cleared");

        rt.fd_close(read_end);
        rt.fd_close(write_end);
        rt.shutdown();
    }
}
