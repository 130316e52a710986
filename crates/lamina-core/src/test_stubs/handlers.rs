//! 记录型回调：测试断言端点事件轨迹的标准桩。

use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{
    Result,
    aux::AuxTags,
    endpoint::{Endpoint, EndpointHandler},
    error::CoreError,
    ll::{Done, DoneErr},
};

/// 一条被记录的读事件。
#[derive(Clone, Debug)]
pub struct ReadEvent {
    pub err_code: Option<&'static str>,
    pub data: Vec<u8>,
    pub oob: bool,
}

struct RecState {
    reads: Vec<ReadEvent>,
    write_readies: usize,
    consume_limit: Option<usize>,
    consume_plan: Vec<usize>,
    endpoint: Option<Endpoint>,
    disable_write_on_ready: bool,
}

/// `RecordingHandler` 记录全部事件并按配置消费数据。
///
/// # 契约说明（What）
/// - 缺省全量消费；`set_consume_limit` 可制造"短读"（部分消费）或
///   0 消费（完全背压）；
/// - `bind_endpoint` + `disable_write_on_ready` 组合让写就绪只通知一次，
///   这是电平触发语义下测试的标准用法。
pub struct RecordingHandler {
    state: Mutex<RecState>,
}

impl RecordingHandler {
    pub fn new() -> Arc<RecordingHandler> {
        Arc::new(RecordingHandler {
            state: Mutex::new(RecState {
                reads: Vec::new(),
                write_readies: 0,
                consume_limit: None,
                consume_plan: Vec::new(),
                endpoint: None,
                disable_write_on_ready: false,
            }),
        })
    }

    /// 绑定端点，供回调内反向操作（如收到写就绪后自动关写使能）。
    pub fn bind_endpoint(&self, endpoint: Endpoint) {
        self.state.lock().endpoint = Some(endpoint);
    }

    /// 写就绪时自动关掉写使能（需要先 `bind_endpoint`）。
    pub fn disable_write_on_ready(&self) {
        self.state.lock().disable_write_on_ready = true;
    }

    /// 设置单次回调最多消费的字节数；`None` 为全量消费。
    pub fn set_consume_limit(&self, limit: Option<usize>) {
        self.state.lock().consume_limit = limit;
    }

    /// 设定未来各次数据回调的消费量序列；耗尽后回落到 `consume_limit`。
    pub fn set_consume_plan(&self, plan: &[usize]) {
        self.state.lock().consume_plan = plan.to_vec();
    }

    /// 返回记录的读事件副本。
    pub fn reads(&self) -> Vec<ReadEvent> {
        self.state.lock().reads.clone()
    }

    /// 把所有无错读事件的数据拼接返回。
    pub fn collected_data(&self) -> Vec<u8> {
        let st = self.state.lock();
        let mut out = Vec::new();
        for event in st.reads.iter().filter(|e| e.err_code.is_none()) {
            out.extend_from_slice(&event.data);
        }
        out
    }

    /// 返回记录到的第一个错误码。
    pub fn first_error(&self) -> Option<&'static str> {
        self.state
            .lock()
            .reads
            .iter()
            .find_map(|event| event.err_code)
    }

    /// 写就绪通知次数。
    pub fn write_readies(&self) -> usize {
        self.state.lock().write_readies
    }
}

impl EndpointHandler for RecordingHandler {
    fn read(&self, err: Option<&CoreError>, buf: &[u8], aux: &AuxTags) -> usize {
        let mut st = self.state.lock();
        let take = if st.consume_plan.is_empty() {
            st.consume_limit.unwrap_or(buf.len()).min(buf.len())
        } else {
            st.consume_plan.remove(0).min(buf.len())
        };
        // 只记录实际消费的前缀，重投的后缀不会被重复统计。
        st.reads.push(ReadEvent {
            err_code: err.map(|e| e.code()),
            data: buf[..take].to_vec(),
            oob: aux.is_oob(),
        });
        take
    }

    fn write_ready(&self) {
        let endpoint = {
            let mut st = self.state.lock();
            st.write_readies += 1;
            if st.disable_write_on_ready {
                st.endpoint.clone()
            } else {
                None
            }
        };
        if let Some(endpoint) = endpoint {
            endpoint.set_write_enabled(false);
        }
    }
}

/// 完成回调的记录器：捕获 open/close done 的触发次数与结果。
pub struct DoneRecord {
    state: Mutex<DoneSt>,
}

struct DoneSt {
    count: usize,
    last_err: Option<String>,
    last_code: Option<&'static str>,
}

impl DoneRecord {
    pub fn new() -> Arc<DoneRecord> {
        Arc::new(DoneRecord {
            state: Mutex::new(DoneSt {
                count: 0,
                last_err: None,
                last_code: None,
            }),
        })
    }

    /// 生成可传给 `open` 的完成回调。
    pub fn open_done(self: &Arc<Self>) -> DoneErr {
        let record = Arc::clone(self);
        Box::new(move |result: Result<()>| {
            let mut st = record.state.lock();
            st.count += 1;
            match result {
                Ok(()) => {
                    st.last_err = None;
                    st.last_code = None;
                }
                Err(err) => {
                    st.last_code = Some(err.code());
                    st.last_err = Some(String::from(err.message()));
                }
            }
        })
    }

    /// 生成可传给 `close` 的完成回调。
    pub fn close_done(self: &Arc<Self>) -> Done {
        let record = Arc::clone(self);
        Box::new(move || {
            record.state.lock().count += 1;
        })
    }

    /// 触发次数。
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// 是否已触发。
    pub fn fired(&self) -> bool {
        self.count() > 0
    }

    /// 最近一次结果的错误码；成功为 `None`。
    pub fn last_code(&self) -> Option<&'static str> {
        self.state.lock().last_code
    }
}
