//! 契约测试的公共夹具：回环端点对与握手打桩过滤器。

use std::sync::Arc;
use std::time::Duration;

use lamina_core::endpoint::{Endpoint, EndpointConfig};
use lamina_core::fd::{FdLl, FdLlConfig};
use lamina_core::filter::{Filter, LlSink, ProgressOutcome, UlSink};
use lamina_core::runtime::SysFd;
use lamina_core::test_stubs::{DoneRecord, LoopRuntime, PipeDriver, RecordingHandler, as_os_funcs};
use lamina_core::{Result, aux::AuxTags};
use lamina_filter_delim::{DelimConfig, DelimFilter};

/// 一对经内存管道互联的端点：client 走显式打开，server 走已接入路径。
pub struct Loopback {
    pub rt: Arc<LoopRuntime>,
    pub client: Endpoint,
    pub server: Endpoint,
    pub client_events: Arc<RecordingHandler>,
    pub server_events: Arc<RecordingHandler>,
    pub client_fd: SysFd,
    pub server_fd: SysFd,
}

/// 组装回环夹具；`filter_factory` 为每一端各造一个过滤器实例。
pub fn loopback(filter_factory: &dyn Fn() -> Option<Arc<dyn Filter>>) -> Loopback {
    loopback_with(filter_factory, FdLlConfig::default(), EndpointConfig::default())
}

/// 带配置的回环夹具。
pub fn loopback_with(
    filter_factory: &dyn Fn() -> Option<Arc<dyn Filter>>,
    fd_config: FdLlConfig,
    ep_config: EndpointConfig,
) -> Loopback {
    let rt = LoopRuntime::new();
    let (a, b) = rt.pipe();

    let client_events = RecordingHandler::new();
    let client_ll = FdLl::alloc(as_os_funcs(&rt), PipeDriver::new(a), None, fd_config)
        .expect("client ll alloc");
    let client = Endpoint::alloc(
        as_os_funcs(&rt),
        client_ll,
        filter_factory(),
        Some(client_events.clone()),
        ep_config,
    )
    .expect("client endpoint alloc");
    client_events.bind_endpoint(client.clone());

    let server_events = RecordingHandler::new();
    let server_ll = FdLl::alloc(
        as_os_funcs(&rt),
        PipeDriver::accepted(&rt),
        Some(b),
        fd_config,
    )
    .expect("server ll alloc");
    let server = Endpoint::alloc(
        as_os_funcs(&rt),
        server_ll,
        filter_factory(),
        Some(server_events.clone()),
        ep_config,
    )
    .expect("server endpoint alloc");
    server_events.bind_endpoint(server.clone());

    Loopback {
        rt,
        client,
        server,
        client_events,
        server_events,
        client_fd: a,
        server_fd: b,
    }
}

/// 打开两端并断言都成功。
pub fn open_both(fix: &Loopback) {
    let client_done = DoneRecord::new();
    let server_done = DoneRecord::new();
    fix.client
        .open(client_done.open_done())
        .expect("client open accepted");
    fix.server
        .open_nochild(server_done.open_done())
        .expect("server open accepted");
    fix.rt.run_until_idle();
    assert_eq!(client_done.count(), 1, "client open_done 恰好一次");
    assert_eq!(server_done.count(), 1, "server open_done 恰好一次");
    assert_eq!(client_done.last_code(), None);
    assert_eq!(server_done.last_code(), None);
}

/// 无过滤器。
pub fn no_filter() -> Option<Arc<dyn Filter>> {
    None
}

/// 消息分帧过滤器。
pub fn delim_filter() -> Option<Arc<dyn Filter>> {
    Some(Arc::new(DelimFilter::new(DelimConfig::default())))
}

/// 共享事件顺序日志，用于断言回调之间的先后关系。
pub type SeqLog = Arc<std::sync::Mutex<Vec<String>>>;

/// 新建空的顺序日志。
pub fn seq_log() -> SeqLog {
    Arc::new(std::sync::Mutex::new(Vec::new()))
}

/// 读取日志快照。
pub fn seq_entries(log: &SeqLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// 把读事件按序写进日志的端点回调（全量消费）。
pub struct SeqHandler {
    log: SeqLog,
}

impl SeqHandler {
    pub fn new(log: SeqLog) -> Arc<SeqHandler> {
        Arc::new(SeqHandler { log })
    }
}

impl lamina_core::endpoint::EndpointHandler for SeqHandler {
    fn read(
        &self,
        err: Option<&lamina_core::error::CoreError>,
        buf: &[u8],
        _aux: &AuxTags,
    ) -> usize {
        let entry = match err {
            Some(err) => format!("read-err:{}", err.code()),
            None => format!("read:{}", buf.len()),
        };
        self.log.lock().unwrap().push(entry);
        buf.len()
    }

    fn write_ready(&self) {}
}

/// 生成写顺序日志的 open 完成回调。
pub fn seq_open_done(log: &SeqLog, label: &'static str) -> lamina_core::ll::DoneErr {
    let log = Arc::clone(log);
    Box::new(move |result: Result<()>| {
        let entry = match result {
            Ok(()) => format!("{label}:ok"),
            Err(err) => format!("{label}:{}", err.code()),
        };
        log.lock().unwrap().push(entry);
    })
}

/// 生成写顺序日志的 close 完成回调。
pub fn seq_close_done(log: &SeqLog, label: &'static str) -> lamina_core::ll::Done {
    let log = Arc::clone(log);
    Box::new(move || {
        log.lock().unwrap().push(format!("{label}:ok"));
    })
}

/// 永远要求"定时器后重试"的握手打桩过滤器，用于超时路径。
pub struct StallFilter {
    retry: Duration,
}

impl StallFilter {
    pub fn new(retry: Duration) -> Arc<StallFilter> {
        Arc::new(StallFilter { retry })
    }
}

impl Filter for StallFilter {
    fn try_connect(&self) -> Result<ProgressOutcome> {
        Ok(ProgressOutcome::RetryOnIoOrTimer(self.retry))
    }

    fn try_disconnect(&self) -> Result<ProgressOutcome> {
        Ok(ProgressOutcome::Complete)
    }

    fn ul_write(&self, sg: &[&[u8]], _aux: &AuxTags, _sink: &mut dyn LlSink) -> Result<usize> {
        Ok(sg.iter().map(|chunk| chunk.len()).sum())
    }

    fn ll_write(&self, buf: &[u8], _aux: &AuxTags, _sink: &mut dyn UlSink) -> Result<usize> {
        Ok(buf.len())
    }

    fn ul_read_pending(&self) -> bool {
        false
    }

    fn ll_write_pending(&self) -> bool {
        false
    }

    fn ll_read_needed(&self) -> bool {
        true
    }
}
