//! 句柄下层的行为测试：缓冲读取、延迟重投、连接完成与优雅关闭。

use std::sync::Mutex;
use std::time::Duration;

use lamina_core::aux::AuxTags;
use lamina_core::error::CoreError;
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::ll::{LlHandler, LowerLayer, OpenResult};
use lamina_core::runtime::OsFuncs;
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, as_os_funcs};

use std::sync::Arc;

/// 下层事件记录器：按配置消费前缀，记录全部投递。
struct LlRecorder {
    state: Mutex<RecState>,
}

struct RecState {
    chunks: Vec<Vec<u8>>,
    errors: Vec<&'static str>,
    write_readies: usize,
    consume_plan: Vec<usize>,
}

impl LlRecorder {
    fn new() -> Arc<LlRecorder> {
        Arc::new(LlRecorder {
            state: Mutex::new(RecState {
                chunks: Vec::new(),
                errors: Vec::new(),
                write_readies: 0,
                consume_plan: Vec::new(),
            }),
        })
    }

    /// 设定未来各次回调的消费量；耗尽后全量消费。
    fn plan_consumes(&self, plan: &[usize]) {
        self.state.lock().unwrap().consume_plan = plan.to_vec();
    }

    fn collected(&self) -> Vec<u8> {
        let st = self.state.lock().unwrap();
        st.chunks.iter().flatten().copied().collect()
    }

    fn read_count(&self) -> usize {
        self.state.lock().unwrap().chunks.len()
    }

    fn errors(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().errors.clone()
    }
}

impl LlHandler for LlRecorder {
    fn read(&self, err: Option<CoreError>, buf: &[u8], _aux: &AuxTags) -> usize {
        let mut st = self.state.lock().unwrap();
        if let Some(err) = err {
            st.errors.push(err.code());
            return 0;
        }
        let take = if st.consume_plan.is_empty() {
            buf.len()
        } else {
            st.consume_plan.remove(0).min(buf.len())
        };
        st.chunks.push(buf[..take].to_vec());
        take
    }

    fn write_ready(&self) {
        self.state.lock().unwrap().write_readies += 1;
    }
}

fn fixture(config: FdLlConfig) -> (Arc<LoopRuntime>, Arc<FdLl>, Arc<LlRecorder>, lamina_core::runtime::SysFd) {
    let rt = LoopRuntime::new();
    let (a, b) = rt.pipe();
    let ll = FdLl::alloc(as_os_funcs(&rt), PipeDriver::new(a), None, config).unwrap();
    let recorder = LlRecorder::new();
    ll.set_handler(recorder.clone());
    (rt, ll, recorder, b)
}

#[test]
fn sync_open_then_read_write_close() {
    let (rt, ll, recorder, peer) = fixture(FdLlConfig::default());

    let open = DoneRecord::new();
    assert!(matches!(ll.open(open.open_done()).unwrap(), OpenResult::Open));
    assert!(!open.fired(), "同步打开不经回调");

    // 对端写入的数据经读路径投递
    ll.set_read_enabled(true);
    let wrote = rt.fd_write(peer, &[b"hello fd"]).unwrap();
    assert_eq!(wrote, 8);
    rt.run_until_idle();
    assert_eq!(recorder.collected(), b"hello fd");

    // 写路径落到对端
    let count = ll.write(&[b"pong"], &AuxTags::empty()).unwrap();
    assert_eq!(count, 4);
    assert_eq!(rt.drain_incoming(peer), b"pong");

    // 关闭：done 恰好一次，先于它的读事件都已投递
    let close = DoneRecord::new();
    ll.close(close.close_done()).unwrap();
    rt.run_until_idle();
    assert_eq!(close.count(), 1);
}

#[test]
fn partial_consume_reoffers_suffix_in_order() {
    let (rt, ll, recorder, peer) = fixture(FdLlConfig::default());
    let open = DoneRecord::new();
    ll.open(open.open_done()).unwrap();

    recorder.plan_consumes(&[3, 3]);
    ll.set_read_enabled(true);
    rt.fd_write(peer, &[b"abcdefgh"]).unwrap();
    rt.run_until_idle();

    // 3 + 3 + 2：未消费后缀按序重投，永不丢失
    assert_eq!(recorder.collected(), b"abcdefgh");
    assert!(recorder.read_count() >= 3, "部分消费应产生多次投递");
}

#[test]
fn zero_consume_redelivers_through_runner() {
    let (rt, ll, recorder, peer) = fixture(FdLlConfig::default());
    let open = DoneRecord::new();
    ll.open(open.open_done()).unwrap();

    // 第一次回调 0 消费（背压），随后全量消费。
    recorder.plan_consumes(&[0]);
    ll.set_read_enabled(true);
    rt.fd_write(peer, &[b"pressure"]).unwrap();
    rt.run_until_idle();

    assert_eq!(recorder.collected(), b"pressure", "零消费后数据必须经延迟执行器重投");
}

#[test]
fn async_connect_completes_on_write_ready() {
    let rt = LoopRuntime::new();
    let (a, _b) = rt.pipe();
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::with_async_connect(a),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    ll.set_handler(LlRecorder::new());

    let open = DoneRecord::new();
    assert!(matches!(
        ll.open(open.open_done()).unwrap(),
        OpenResult::InProgress
    ));
    assert!(!open.fired());

    rt.run_until_idle();
    assert_eq!(open.count(), 1);
    assert_eq!(open.last_code(), None, "连接完成应以成功收尾");
}

#[test]
fn graceful_close_polls_until_drained() {
    let rt = LoopRuntime::new();
    let (a, _b) = rt.pipe();
    let poll_delay = Duration::from_millis(10);
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::with_close_polls(a, 3, poll_delay),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    ll.set_handler(LlRecorder::new());

    let open = DoneRecord::new();
    ll.open(open.open_done()).unwrap();

    let started = rt.now();
    let close = DoneRecord::new();
    ll.close(close.close_done()).unwrap();
    rt.run_until_idle();
    assert_eq!(close.count(), 0, "排空轮询未完成前不得收尾");

    rt.advance(poll_delay);
    assert_eq!(close.count(), 0);
    rt.advance(poll_delay);
    assert_eq!(close.count(), 0);
    rt.advance(poll_delay);
    assert_eq!(close.count(), 1, "第三次轮询放行后收尾");
    let elapsed = rt.now().saturating_duration_since(started);
    assert!(elapsed >= Duration::from_millis(30));
}

#[test]
fn eof_surfaces_remote_closed_once_enabled() {
    let (rt, ll, recorder, peer) = fixture(FdLlConfig::default());
    let open = DoneRecord::new();
    ll.open(open.open_done()).unwrap();

    ll.set_read_enabled(true);
    rt.fd_close(peer);
    rt.run_until_idle();

    assert_eq!(recorder.errors(), ["endpoint.remote_closed"]);
}

#[test]
fn write_only_mode_never_arms_read() {
    let rt = LoopRuntime::new();
    let (a, b) = rt.pipe();
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::new(a),
        None,
        FdLlConfig::default().write_only(),
    )
    .unwrap();
    let recorder = LlRecorder::new();
    ll.set_handler(recorder.clone());
    let open = DoneRecord::new();
    ll.open(open.open_done()).unwrap();

    ll.set_read_enabled(true);
    rt.fd_write(b, &[b"never seen"]).unwrap();
    rt.run_until_idle();

    assert_eq!(recorder.read_count(), 0, "只写模式不得武装读回调");
}

#[test]
fn disable_is_a_hard_stop() {
    let rt = LoopRuntime::new();
    let (a, _b) = rt.pipe();
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::with_async_connect(a),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    ll.set_handler(LlRecorder::new());

    let open = DoneRecord::new();
    ll.open(open.open_done()).unwrap();
    ll.disable();
    rt.run_until_idle();

    assert_eq!(open.count(), 0, "硬停后任何完成回调都不得触发");
}
