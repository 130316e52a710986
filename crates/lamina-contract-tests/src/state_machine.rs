//! 状态机主题：端点生命周期不变量与同步拒绝语义。

use std::sync::Arc;

use crate::case::{TckCase, TckSuite};
use crate::support::{
    SeqHandler, loopback, no_filter, open_both, seq_entries, seq_log, seq_open_done,
};

use lamina_core::aux::AuxTags;
use lamina_core::endpoint::{Endpoint, EndpointConfig};
use lamina_core::error::codes;
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, as_os_funcs};

const CASES: &[TckCase] = &[
    TckCase {
        name: "write_before_open_returns_not_ready",
        test: write_before_open_returns_not_ready,
    },
    TckCase {
        name: "second_open_is_rejected",
        test: second_open_is_rejected,
    },
    TckCase {
        name: "open_done_precedes_first_read",
        test: open_done_precedes_first_read,
    },
    TckCase {
        name: "close_done_fires_exactly_once_after_reads",
        test: close_done_fires_exactly_once_after_reads,
    },
    TckCase {
        name: "close_after_failed_open_returns_not_ready",
        test: close_after_failed_open_returns_not_ready,
    },
    TckCase {
        name: "double_read_enable_is_idempotent",
        test: double_read_enable_is_idempotent,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "state_machine",
    cases: CASES,
};

/// 返回"状态机"主题的测试套件。
pub(crate) const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 新分配端点上的写必须同步拒绝，且没有字节穿过下层。
fn write_before_open_returns_not_ready() {
    let fix = loopback(&no_filter);
    let err = fix
        .client
        .write(&[b"early"], &AuxTags::empty())
        .unwrap_err();
    assert_eq!(err.code(), codes::NOT_READY);
    fix.rt.run_until_idle();
    assert!(
        fix.rt.drain_incoming(fix.server_fd).is_empty(),
        "未打开的端点不得向下层漏字节"
    );
}

/// 同一端点同一时刻只允许一个在途打开。
fn second_open_is_rejected() {
    let fix = loopback(&no_filter);
    open_both(&fix);
    let done = DoneRecord::new();
    let err = fix.client.open(done.open_done()).unwrap_err();
    assert_eq!(err.code(), codes::NOT_READY);
    assert_eq!(done.count(), 0, "被拒绝的打开不得触发 done");
}

/// open_done 先于任何读事件。
fn open_done_precedes_first_read() {
    let fix = loopback(&no_filter);
    let log = seq_log();
    fix.client.set_handler(SeqHandler::new(Arc::clone(&log)));

    // 先把数据排进客户端的管道，再打开并立即使能读。
    fix.rt.inject_incoming(fix.client_fd, b"early bytes");
    fix.client
        .open(seq_open_done(&log, "open"))
        .expect("open accepted");
    fix.client.set_read_enabled(true);
    fix.rt.run_until_idle();

    let entries = seq_entries(&log);
    assert!(!entries.is_empty());
    assert_eq!(entries[0], "open:ok", "读事件不得先于 open_done: {entries:?}");
    assert!(entries[1..].iter().any(|e| e.starts_with("read:")));
}

/// close_done 恰好一次，且晚于全部读事件；第二个关闭被同步拒绝。
fn close_done_fires_exactly_once_after_reads() {
    let fix = loopback(&no_filter);
    open_both(&fix);
    fix.client.set_read_enabled(true);
    fix.server.write(&[b"payload"], &AuxTags::empty()).unwrap();

    let close = DoneRecord::new();
    fix.client.close(close.close_done()).unwrap();
    let second = fix.client.close(DoneRecord::new().close_done());
    assert_eq!(second.unwrap_err().code(), codes::NOT_READY);

    fix.rt.run_until_idle();
    assert_eq!(close.count(), 1, "close_done 必须恰好一次");
}

/// 打开同步失败后端点保持干净；补一刀 close 仍然返回 not_ready。
fn close_after_failed_open_returns_not_ready() {
    let rt = LoopRuntime::new();
    // accepted 驱动没有句柄可交，sub_open 必然失败。
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::accepted(&rt),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    let endpoint = Endpoint::alloc(as_os_funcs(&rt), ll, None, None, EndpointConfig::default())
        .unwrap();

    let done = DoneRecord::new();
    assert!(endpoint.open(done.open_done()).is_err());
    assert_eq!(done.count(), 0);

    let close = DoneRecord::new();
    let err = endpoint.close(close.close_done()).unwrap_err();
    assert_eq!(err.code(), codes::NOT_READY);
    rt.run_until_idle();
    assert_eq!(close.count(), 0);
}

/// 重复使能读与一次使能等效：缓冲数据只投递一遍。
fn double_read_enable_is_idempotent() {
    let fix = loopback(&no_filter);
    open_both(&fix);
    fix.server.write(&[b"once"], &AuxTags::empty()).unwrap();

    fix.client.set_read_enabled(true);
    fix.client.set_read_enabled(true);
    fix.rt.run_until_idle();

    assert_eq!(fix.client_events.collected_data(), b"once");
}
