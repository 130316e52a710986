//! 回环主题：分帧过滤器叠在管道传输上的端到端透明性。

use crate::case::{TckCase, TckSuite};
use crate::support::{delim_filter, loopback, open_both};

use lamina_core::aux::AuxTags;

const CASES: &[TckCase] = &[
    TckCase {
        name: "two_messages_arrive_as_two_events",
        test: two_messages_arrive_as_two_events,
    },
    TckCase {
        name: "echo_round_trip_preserves_bytes",
        test: echo_round_trip_preserves_bytes,
    },
    TckCase {
        name: "large_message_crosses_read_buffer_boundary",
        test: large_message_crosses_read_buffer_boundary,
    },
];

const SUITE: TckSuite = TckSuite {
    name: "roundtrip",
    cases: CASES,
};

/// 返回"回环"主题的测试套件。
pub(crate) const fn suite() -> &'static TckSuite {
    &SUITE
}

/// 发送两条 `"hello\n"`：对端恰好收到两次读事件，每次 6 字节，保序。
fn two_messages_arrive_as_two_events() {
    let fix = loopback(&delim_filter);
    open_both(&fix);
    fix.server.set_read_enabled(true);

    fix.client.write(&[b"hello\n"], &AuxTags::empty()).unwrap();
    fix.client.write(&[b"hello\n"], &AuxTags::empty()).unwrap();
    fix.rt.run_until_idle();

    let reads: Vec<_> = fix
        .server_events
        .reads()
        .into_iter()
        .filter(|event| event.err_code.is_none() && !event.data.is_empty())
        .collect();
    assert_eq!(reads.len(), 2, "两条消息必须到达为两次独立事件");
    assert_eq!(reads[0].data, b"hello\n");
    assert_eq!(reads[1].data, b"hello\n");
}

/// 服务端把收到的消息原样回写，客户端取回完全相同的字节。
fn echo_round_trip_preserves_bytes() {
    let fix = loopback(&delim_filter);
    open_both(&fix);
    fix.client.set_read_enabled(true);
    fix.server.set_read_enabled(true);

    fix.client
        .write(&[b"ping with payload"], &AuxTags::empty())
        .unwrap();
    fix.rt.run_until_idle();
    assert_eq!(fix.server_events.collected_data(), b"ping with payload");

    for event in fix.server_events.reads() {
        if event.err_code.is_none() && !event.data.is_empty() {
            fix.server.write(&[&event.data], &AuxTags::empty()).unwrap();
        }
    }
    fix.rt.run_until_idle();
    assert_eq!(fix.client_events.collected_data(), b"ping with payload");
}

/// 超过读缓冲容量的消息跨多次下层读重组，仍以单次事件完整交付。
fn large_message_crosses_read_buffer_boundary() {
    let fix = loopback(&delim_filter);
    open_both(&fix);
    fix.server.set_read_enabled(true);

    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    fix.client.write(&[&payload], &AuxTags::empty()).unwrap();
    fix.rt.run_until_idle();

    let reads: Vec<_> = fix
        .server_events
        .reads()
        .into_iter()
        .filter(|event| event.err_code.is_none() && !event.data.is_empty())
        .collect();
    assert_eq!(reads.len(), 1, "消息边界必须保持：一条消息一次事件");
    assert_eq!(reads[0].data, payload);
}
