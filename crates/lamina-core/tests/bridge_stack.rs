//! 叠层测试：把成形端点经桥接件当作父端点的下层使用。

use std::sync::Arc;

use lamina_core::aux::AuxTags;
use lamina_core::bridge::EndpointLl;
use lamina_core::endpoint::{Endpoint, EndpointConfig};
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::runtime::OsFuncs;
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, RecordingHandler, as_os_funcs};

fn stacked_fixture() -> (
    Arc<LoopRuntime>,
    Endpoint,
    Arc<RecordingHandler>,
    lamina_core::runtime::SysFd,
) {
    let rt = LoopRuntime::new();
    let (a, b) = rt.pipe();

    let child_ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::new(a),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    let child = Endpoint::alloc(as_os_funcs(&rt), child_ll, None, None, EndpointConfig::default())
        .unwrap();

    let parent_events = RecordingHandler::new();
    let parent = Endpoint::alloc(
        as_os_funcs(&rt),
        EndpointLl::alloc(child),
        None,
        Some(parent_events.clone()),
        EndpointConfig::default(),
    )
    .unwrap();
    parent_events.bind_endpoint(parent.clone());
    (rt, parent, parent_events, b)
}

#[test]
fn parent_open_propagates_through_child() {
    let (rt, parent, _events, _peer) = stacked_fixture();
    let open = DoneRecord::new();
    parent.open(open.open_done()).unwrap();
    rt.run_until_idle();
    assert_eq!(open.count(), 1);
    assert_eq!(open.last_code(), None, "叠层打开应逐层成功");
}

#[test]
fn data_flows_up_and_down_the_stack() {
    let (rt, parent, events, peer) = stacked_fixture();
    let open = DoneRecord::new();
    parent.open(open.open_done()).unwrap();
    rt.run_until_idle();

    parent.set_read_enabled(true);
    rt.fd_write(peer, &[b"upward"]).unwrap();
    rt.run_until_idle();
    assert_eq!(events.collected_data(), b"upward", "读事件必须穿过两层到达用户");

    let count = parent.write(&[b"downward"], &AuxTags::empty()).unwrap();
    assert_eq!(count, 8);
    assert_eq!(rt.drain_incoming(peer), b"downward", "写必须穿过两层落到线缆");
}

#[test]
fn parent_close_closes_child_exactly_once() {
    let (rt, parent, _events, _peer) = stacked_fixture();
    let open = DoneRecord::new();
    parent.open(open.open_done()).unwrap();
    rt.run_until_idle();

    let close = DoneRecord::new();
    parent.close(close.close_done()).unwrap();
    rt.run_until_idle();
    assert_eq!(close.count(), 1, "父端点的 close_done 恰好一次");

    // 子端点已随叠层关闭：父端点再次关闭被同步拒绝。
    let second = DoneRecord::new();
    assert!(parent.close(second.close_done()).is_err());
}
