//! 带外主题：FIFO 次序、短写推进与排水后恢复普通写就绪。

use bytes::Bytes;

use crate::case::{TckCase, TckSuite};
use crate::support::{loopback, no_filter, open_both};

use lamina_core::aux::AuxTags;
use lamina_core::test_stubs::DoneRecord;

const CASES: &[TckCase] = &[
    TckCase {
        name: "oob_record_survives_short_writes",
        test: oob_record_survives_short_writes,
    },
    TckCase {
        name: "oob_records_drain_in_fifo_order",
        test: oob_records_drain_in_fifo_order,
    },
    TckCase {
        name: "normal_write_ready_resumes_after_drain",
        test: normal_write_ready_resumes_after_drain,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "oob",
    cases: CASES,
};

/// 返回"带外"主题的测试套件。
pub(crate) const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 100 字节带外记录在短写下分三次落线：send_done 恰好一次，
/// 且记录中途普通写必须让路。
fn oob_record_survives_short_writes() {
    let fix = loopback(&no_filter);
    open_both(&fix);

    fix.rt.set_write_limit(fix.client_fd, Some(40));
    let payload: Vec<u8> = (0..100u8).collect();
    let done = DoneRecord::new();
    fix.client
        .write_oob(Bytes::from(payload.clone()), Some(done.close_done()))
        .unwrap();

    // 推进到第一次短写落地（40 字节），记录处于半途。
    let mut guard = 0;
    while fix.rt.incoming_len(fix.server_fd) < 40 {
        assert!(fix.rt.step(), "带外排水应当有进展");
        guard += 1;
        assert!(guard < 1000);
    }
    assert_eq!(done.count(), 0, "记录未完成前 send_done 不得触发");

    // 半途的普通写必须让路，保证记录不被拆散。
    let interleaved = fix.client.write(&[b"normal"], &AuxTags::empty()).unwrap();
    assert_eq!(interleaved, 0, "带外记录中途普通写应返回 0");

    fix.rt.run_until_idle();
    assert_eq!(done.count(), 1, "send_done 恰好一次");
    assert_eq!(fix.rt.drain_incoming(fix.server_fd), payload);
}

/// 多条带外记录严格按入队次序落线，done 依次触发。
fn oob_records_drain_in_fifo_order() {
    let fix = loopback(&no_filter);
    open_both(&fix);

    let first = DoneRecord::new();
    let second = DoneRecord::new();
    fix.client
        .write_oob(Bytes::from_static(b"first-"), Some(first.close_done()))
        .unwrap();
    fix.client
        .write_oob(Bytes::from_static(b"second"), Some(second.close_done()))
        .unwrap();
    fix.rt.run_until_idle();

    assert_eq!(fix.rt.drain_incoming(fix.server_fd), b"first-second");
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 1);
}

/// 队列排空后，普通的写就绪传播恢复。
fn normal_write_ready_resumes_after_drain() {
    let fix = loopback(&no_filter);
    open_both(&fix);
    fix.client_events.disable_write_on_ready();

    fix.client
        .write_oob(Bytes::from_static(b"priority"), None)
        .unwrap();
    fix.client.set_write_enabled(true);
    fix.rt.run_until_idle();

    assert_eq!(fix.rt.drain_incoming(fix.server_fd), b"priority");
    assert!(
        fix.client_events.write_readies() >= 1,
        "排空后普通写就绪应当恢复"
    );
}
