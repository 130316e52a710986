//! 背压主题：短读重投、零消费重投与只写模式。

use crate::case::{TckCase, TckSuite};
use crate::support::{loopback, loopback_with, no_filter, open_both};

use lamina_core::aux::AuxTags;
use lamina_core::endpoint::EndpointConfig;
use lamina_core::fd::FdLlConfig;

const CASES: &[TckCase] = &[
    TckCase {
        name: "short_reads_reoffer_suffix_in_order",
        test: short_reads_reoffer_suffix_in_order,
    },
    TckCase {
        name: "zero_consume_is_redelivered_later",
        test: zero_consume_is_redelivered_later,
    },
    TckCase {
        name: "write_only_endpoint_never_reads",
        test: write_only_endpoint_never_reads,
    },
    TckCase {
        name: "disabled_read_holds_data_until_enable",
        test: disabled_read_holds_data_until_enable,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "backpressure",
    cases: CASES,
};

/// 返回"背压"主题的测试套件。
pub(crate) const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 用户短读：未消费后缀按序重投，一个字节都不丢。
fn short_reads_reoffer_suffix_in_order() {
    let fix = loopback(&no_filter);
    open_both(&fix);

    fix.client_events.set_consume_plan(&[3, 3]);
    fix.client.set_read_enabled(true);
    fix.server.write(&[b"abcdefgh"], &AuxTags::empty()).unwrap();
    fix.rt.run_until_idle();

    assert_eq!(fix.client_events.collected_data(), b"abcdefgh");
    assert!(
        fix.client_events.reads().len() >= 3,
        "部分消费应产生多次投递"
    );
}

/// 零消费是背压信号：数据经延迟执行器重投，随后照常送达。
fn zero_consume_is_redelivered_later() {
    let fix = loopback(&no_filter);
    open_both(&fix);

    fix.client_events.set_consume_plan(&[0]);
    fix.client.set_read_enabled(true);
    fix.server.write(&[b"pressure"], &AuxTags::empty()).unwrap();
    fix.rt.run_until_idle();

    assert_eq!(fix.client_events.collected_data(), b"pressure");
}

/// 只写端点：读回调永不武装，读事件永不发生。
fn write_only_endpoint_never_reads() {
    let fix = loopback_with(
        &no_filter,
        FdLlConfig::default().write_only(),
        EndpointConfig::default(),
    );
    let client_done = lamina_core::test_stubs::DoneRecord::new();
    fix.client.open(client_done.open_done()).unwrap();
    fix.rt.run_until_idle();
    assert_eq!(client_done.count(), 1);

    fix.client.set_read_enabled(true);
    fix.rt.inject_incoming(fix.client_fd, b"invisible");
    fix.rt.run_until_idle();

    assert!(
        fix.client_events.reads().is_empty(),
        "只写模式不得产生读事件"
    );

    // 写方向不受影响。
    let count = fix.client.write(&[b"outbound"], &AuxTags::empty()).unwrap();
    assert_eq!(count, 8);
    assert_eq!(fix.rt.drain_incoming(fix.server_fd), b"outbound");
}

/// 读未使能时数据原地等待；使能后经延迟路径送达。
fn disabled_read_holds_data_until_enable() {
    let fix = loopback(&no_filter);
    open_both(&fix);

    fix.server.write(&[b"parked"], &AuxTags::empty()).unwrap();
    fix.rt.run_until_idle();
    assert!(
        fix.client_events.reads().is_empty(),
        "读未使能时不得投递"
    );

    fix.client.set_read_enabled(true);
    fix.rt.run_until_idle();
    assert_eq!(fix.client_events.collected_data(), b"parked");
}
