//! 取消主题：关闭抢占在途打开，以及握手截止时间。

use std::sync::Arc;
use std::time::Duration;

use crate::case::{TckCase, TckSuite};
use crate::support::{
    StallFilter, loopback_with, seq_close_done, seq_entries, seq_log, seq_open_done,
};

use lamina_core::aux::AuxTags;
use lamina_core::endpoint::{Endpoint, EndpointConfig};
use lamina_core::error::codes;
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::filter::Filter;
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, as_os_funcs};

const CASES: &[TckCase] = &[
    TckCase {
        name: "close_preempts_inflight_open",
        test: close_preempts_inflight_open,
    },
    TckCase {
        name: "handshake_deadline_aborts_open",
        test: handshake_deadline_aborts_open,
    },
    TckCase {
        name: "write_during_handshake_is_rejected",
        test: write_during_handshake_is_rejected,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "cancellation",
    cases: CASES,
};

/// 返回"取消"主题的测试套件。
pub(crate) const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 关闭抢占在途打开：open_done 以 CANCELLED 先收尾，close_done 随后。
fn close_preempts_inflight_open() {
    let rt = LoopRuntime::new();
    let (a, _b) = rt.pipe();
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::with_async_connect(a),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    let endpoint = Endpoint::alloc(as_os_funcs(&rt), ll, None, None, EndpointConfig::default())
        .unwrap();

    let log = seq_log();
    endpoint.open(seq_open_done(&log, "open")).unwrap();
    endpoint.close(seq_close_done(&log, "close")).unwrap();
    rt.run_until_idle();

    assert_eq!(
        seq_entries(&log),
        ["open:endpoint.cancelled", "close:ok"],
        "open_done(CANCELLED) 必须先于 close_done"
    );
}

/// 过滤器一直要求重试时，打开在总截止时间耗尽后以 TIMEDOUT 收场，
/// 下层被内部关闭。
fn handshake_deadline_aborts_open() {
    let stall = || -> Option<Arc<dyn Filter>> { Some(StallFilter::new(Duration::from_millis(100))) };
    let fix = loopback_with(
        &stall,
        FdLlConfig::default(),
        EndpointConfig::default().with_handshake_timeout(Some(Duration::from_millis(350))),
    );

    let done = DoneRecord::new();
    fix.client.open(done.open_done()).unwrap();
    fix.rt.run_until_idle();
    assert_eq!(done.count(), 0, "截止时间之前不得失败");

    for _ in 0..4 {
        fix.rt.advance(Duration::from_millis(100));
    }
    assert_eq!(done.count(), 1);
    assert_eq!(done.last_code(), Some(codes::TIMED_OUT));

    // 中止路径内部已经关过下层：用户的 close 只能得到 not_ready。
    let close = DoneRecord::new();
    let err = fix.client.close(close.close_done()).unwrap_err();
    assert_eq!(err.code(), codes::NOT_READY);
}

/// 握手期间端点对用户而言尚未打开，写被同步拒绝。
fn write_during_handshake_is_rejected() {
    let stall = || -> Option<Arc<dyn Filter>> { Some(StallFilter::new(Duration::from_millis(50))) };
    let fix = loopback_with(
        &stall,
        FdLlConfig::default(),
        EndpointConfig::default(),
    );
    let done = DoneRecord::new();
    fix.client.open(done.open_done()).unwrap();

    let err = fix
        .client
        .write(&[b"too soon"], &AuxTags::empty())
        .unwrap_err();
    assert_eq!(err.code(), codes::NOT_READY);
}
