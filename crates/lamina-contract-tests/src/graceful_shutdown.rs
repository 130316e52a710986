//! 优雅关闭主题：排空、驱动轮询与硬停。

use std::sync::Arc;
use std::time::Duration;

use crate::case::{TckCase, TckSuite};
use crate::support::{
    SeqHandler, StallFilter, delim_filter, loopback, open_both, seq_close_done, seq_entries,
    seq_log,
};

use lamina_core::aux::AuxTags;
use lamina_core::endpoint::{Endpoint, EndpointConfig};
use lamina_core::filter::Filter;
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::runtime::OsFuncs;
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, as_os_funcs};

const CASES: &[TckCase] = &[
    TckCase {
        name: "close_polls_driver_until_drained",
        test: close_polls_driver_until_drained,
    },
    TckCase {
        name: "pending_filter_output_drains_before_close",
        test: pending_filter_output_drains_before_close,
    },
    TckCase {
        name: "buffered_reads_delivered_before_close_done",
        test: buffered_reads_delivered_before_close_done,
    },
    TckCase {
        name: "disable_during_handshake_never_fires_open_done",
        test: disable_during_handshake_never_fires_open_done,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "graceful_shutdown",
    cases: CASES,
};

/// 返回"优雅关闭"主题的测试套件。
pub(crate) const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 驱动的排空检查逐次放行：close_done 在第三次轮询后触发，
/// 总耗时不短于三个轮询间隔。
fn close_polls_driver_until_drained() {
    let rt = LoopRuntime::new();
    let (a, _b) = rt.pipe();
    let poll = Duration::from_millis(10);
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::with_close_polls(a, 3, poll),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    let endpoint = Endpoint::alloc(as_os_funcs(&rt), ll, None, None, EndpointConfig::default())
        .unwrap();
    let open = DoneRecord::new();
    endpoint.open(open.open_done()).unwrap();
    rt.run_until_idle();

    let started = rt.now();
    let close = DoneRecord::new();
    endpoint.close(close.close_done()).unwrap();
    rt.run_until_idle();
    assert_eq!(close.count(), 0, "内核侧尚未排空，不得提前收尾");

    rt.advance(poll);
    rt.advance(poll);
    assert_eq!(close.count(), 0);
    rt.advance(poll);
    assert_eq!(close.count(), 1);
    assert!(rt.now().saturating_duration_since(started) >= Duration::from_millis(30));
}

/// 关闭先把过滤器里积压的下行输出排干净，对端收到完整消息。
fn pending_filter_output_drains_before_close() {
    let fix = loopback(&delim_filter);
    open_both(&fix);
    fix.server.set_read_enabled(true);

    // 限制客户端单次写出 4 字节：一条消息必然在过滤器里积压。
    fix.rt.set_write_limit(fix.client_fd, Some(4));
    let accepted = fix.client.write(&[b"payload"], &AuxTags::empty()).unwrap();
    assert_eq!(accepted, 7, "过滤器应整条收下消息");

    let close = DoneRecord::new();
    fix.client.close(close.close_done()).unwrap();
    fix.rt.run_until_idle();

    assert_eq!(close.count(), 1);
    let server_reads = fix.server_events.reads();
    assert_eq!(
        server_reads.iter().filter(|e| e.err_code.is_none()).count(),
        1,
        "对端应收到完整的一条消息"
    );
    assert_eq!(fix.server_events.collected_data(), b"payload");
}

/// 关闭排空期间读使能保持开启：在途数据先于 close_done 送达。
fn buffered_reads_delivered_before_close_done() {
    let fix = loopback(&delim_filter);
    open_both(&fix);

    let log = seq_log();
    fix.client.set_handler(SeqHandler::new(Arc::clone(&log)));
    fix.client.set_read_enabled(true);

    // 客户端留一条尚未排完的出站消息，让关闭经过排空阶段。
    fix.rt.set_write_limit(fix.client_fd, Some(4));
    fix.client.write(&[b"going away"], &AuxTags::empty()).unwrap();
    // 对端同时送来一条消息。
    fix.server.write(&[b"farewell"], &AuxTags::empty()).unwrap();

    fix.client.close(seq_close_done(&log, "close")).unwrap();
    fix.rt.run_until_idle();

    let entries = seq_entries(&log);
    let read_at = entries.iter().position(|e| e == "read:8");
    let close_at = entries.iter().position(|e| e == "close:ok");
    assert!(
        matches!((read_at, close_at), (Some(r), Some(c)) if r < c),
        "缓冲数据必须先于 close_done: {entries:?}"
    );
}

/// 握手期间硬停是无声的：open_done 永不触发。
fn disable_during_handshake_never_fires_open_done() {
    let rt = LoopRuntime::new();
    let (a, _b) = rt.pipe();
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::new(a),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    let filter: Arc<dyn Filter> = StallFilter::new(Duration::from_millis(50));
    let endpoint = Endpoint::alloc(
        as_os_funcs(&rt),
        ll,
        Some(filter),
        None,
        EndpointConfig::default(),
    )
    .unwrap();

    let open = DoneRecord::new();
    endpoint.open(open.open_done()).unwrap();
    endpoint.disable();
    rt.advance(Duration::from_millis(500));

    assert_eq!(open.count(), 0, "硬停后 open_done 不得触发");
}
