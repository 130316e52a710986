//! 常用类型一站式导入。
//!
//! # 使用方式（How）
//! - `use lamina_core::prelude::*;` 即可获得组装端点与实现传输/过滤器
//!   契约所需的全部名字；下游 crate 无须记忆模块路径。

pub use crate::accepter::{Accepter, AccepterHandler, spawn_server_endpoint};
pub use crate::aux::{AuxTags, OOB_TAG};
pub use crate::bridge::EndpointLl;
pub use crate::buffer::ReadBuf;
pub use crate::common::{Error, Result};
pub use crate::endpoint::{Endpoint, EndpointConfig, EndpointHandler};
pub use crate::error::{CoreError, codes};
pub use crate::fd::{ClosePhase, CloseCheck, FdDriver, FdLl, FdLlConfig, SubOpen};
pub use crate::filter::{Filter, FilterCtl, LlSink, ProgressOutcome, UlSink};
pub use crate::ll::{ControlData, Done, DoneErr, LlHandler, LowerLayer, OpenResult};
pub use crate::observability::{LogRecord, LogSeverity, Logger, NoopLogger};
pub use crate::runtime::{
    DeferredRunner, FdHandlers, FdId, MonotonicTimePoint, OsFuncs, RunnerHandler, SysFd, Timer,
    TimerHandler,
};
