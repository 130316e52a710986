//! 数据搬运热路径基准：无过滤器端点的单跳写与读缓冲消费。

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use lamina_core::aux::AuxTags;
use lamina_core::buffer::ReadBuf;
use lamina_core::endpoint::{Endpoint, EndpointConfig, EndpointHandler};
use lamina_core::error::CoreError;
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, as_os_funcs};

struct SinkHandler;

impl EndpointHandler for SinkHandler {
    fn read(&self, _err: Option<&CoreError>, buf: &[u8], _aux: &AuxTags) -> usize {
        buf.len()
    }

    fn write_ready(&self) {}
}

fn bench_endpoint_write(c: &mut Criterion) {
    let rt = LoopRuntime::new();
    let (a, b) = rt.pipe();
    let ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::new(a),
        None,
        FdLlConfig::default(),
    )
    .unwrap();
    let endpoint = Endpoint::alloc(
        as_os_funcs(&rt),
        ll,
        None,
        Some(Arc::new(SinkHandler)),
        EndpointConfig::default(),
    )
    .unwrap();
    let open = DoneRecord::new();
    endpoint.open(open.open_done()).unwrap();
    rt.run_until_idle();
    assert!(open.fired());

    let payload = vec![0x5a_u8; 4096];
    c.bench_function("endpoint_write_4k", |bench| {
        bench.iter(|| {
            let n = endpoint
                .write(&[black_box(payload.as_slice())], &AuxTags::empty())
                .unwrap();
            black_box(n);
            rt.drain_incoming(b);
        });
    });
}

fn bench_read_buf_cycle(c: &mut Criterion) {
    let mut buf = ReadBuf::new(4096);
    let payload = vec![0x33_u8; 4096];
    c.bench_function("read_buf_fill_consume_4k", |bench| {
        bench.iter(|| {
            buf.fill(|dst| {
                dst[..payload.len()].copy_from_slice(&payload);
                Ok(payload.len())
            })
            .unwrap();
            while !buf.is_empty() {
                black_box(buf.unread());
                buf.consume(1024);
            }
        });
    });
}

criterion_group!(benches, bench_endpoint_write, bench_read_buf_cycle);
criterion_main!(benches);
