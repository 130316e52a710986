//! 测试桩命名空间：框架官方维护的确定性运行时与记录型回调。
//!
//! # 设计背景（Why）
//! - 栈运行时的行为高度依赖事件时序；把"可单步推进的事件循环 + 内存
//!   管道 + 记录型回调"集中在这里，单元测试与下游契约测试复用同一套
//!   设施，避免在各处重复定义桩对象。
//!
//! # 使用方式（How）
//! - `LoopRuntime::new()` 建循环，`pipe()` 拿一对互联管道端；
//! - [`PipeDriver`] 把管道端接进 [`crate::fd::FdLl`]；
//! - [`RecordingHandler`] / [`DoneRecord`] 捕获事件轨迹与完成回调；
//! - `step`/`run_until_idle`/`advance` 精确推进时间与事件。

mod handlers;
mod pipe;
mod runtime;

pub use handlers::{DoneRecord, ReadEvent, RecordingHandler};
pub use pipe::PipeDriver;
pub use runtime::{LoopRuntime, as_os_funcs};
