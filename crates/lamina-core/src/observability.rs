//! 可观测性外观：栈运行时的结构化日志出口。
//!
//! # 设计背景（Why）
//! - 端点状态机的排障高度依赖"谁在什么状态做了什么"的轨迹；把日志能力抽象为
//!   对象安全 Trait，宿主可以对接 `tracing`、syslog 或自研后端，核心保持
//!   `no_std + alloc`。
//! - 日志与定时器、延迟执行器同级，是运行时向宿主索取的能力之一。
//!
//! # 契约说明（What）
//! - [`Logger::log`] 是唯一必需方法；便捷方法内部统一构造 [`LogRecord`]，
//!   保证所有路径共享相同的结构化形态。
//! - 字段键值需遵循低基数原则，避免日志存储爆炸。

use core::fmt;

use crate::sealed::Sealed;

/// 日志级别，取 `tracing` 与 OpenTelemetry `SeverityNumber` 的交集。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 单条结构化日志记录。
///
/// # 契约说明（What）
/// - `target`：日志分类，约定使用模块路径风格（如 `lamina::endpoint`）；
/// - `fields`：结构化键值对，值以 `Display` 延迟渲染，提交前不产生分配；
/// - **前置条件**：`fields` 引用必须在 [`Logger::log`] 返回前保持有效。
pub struct LogRecord<'a> {
    pub severity: LogSeverity,
    pub target: &'static str,
    pub message: &'a str,
    pub fields: &'a [(&'static str, &'a dyn fmt::Display)],
}

/// 日志接口的核心契约。
///
/// # 逻辑解析（How）
/// - `log` 为唯一必需方法；`trace`/`debug`/`info`/`warn`/`error` 便捷方法内部
///   构造 [`LogRecord`] 后统一走 `log`。
/// - 实现应尽量非阻塞；事件循环线程上的日志提交不允许做同步 I/O 等待。
pub trait Logger: Send + Sync + 'static + Sealed {
    /// 提交结构化日志。
    fn log(&self, record: &LogRecord<'_>);

    /// 查询指定级别是否会被消费，供调用方跳过昂贵的字段构造。
    fn enabled(&self, _severity: LogSeverity) -> bool {
        true
    }

    /// 输出带字段的 TRACE 日志。
    fn trace(
        &self,
        target: &'static str,
        message: &str,
        fields: &[(&'static str, &dyn fmt::Display)],
    ) {
        self.log(&LogRecord {
            severity: LogSeverity::Trace,
            target,
            message,
            fields,
        });
    }

    /// 输出带字段的 DEBUG 日志。
    fn debug(
        &self,
        target: &'static str,
        message: &str,
        fields: &[(&'static str, &dyn fmt::Display)],
    ) {
        self.log(&LogRecord {
            severity: LogSeverity::Debug,
            target,
            message,
            fields,
        });
    }

    /// 输出带字段的 INFO 日志。
    fn info(
        &self,
        target: &'static str,
        message: &str,
        fields: &[(&'static str, &dyn fmt::Display)],
    ) {
        self.log(&LogRecord {
            severity: LogSeverity::Info,
            target,
            message,
            fields,
        });
    }

    /// 输出带字段的 WARN 日志。
    fn warn(
        &self,
        target: &'static str,
        message: &str,
        fields: &[(&'static str, &dyn fmt::Display)],
    ) {
        self.log(&LogRecord {
            severity: LogSeverity::Warn,
            target,
            message,
            fields,
        });
    }

    /// 输出带字段的 ERROR 日志。
    fn error(
        &self,
        target: &'static str,
        message: &str,
        fields: &[(&'static str, &dyn fmt::Display)],
    ) {
        self.log(&LogRecord {
            severity: LogSeverity::Error,
            target,
            message,
            fields,
        });
    }
}

/// 丢弃一切输出的空实现，供测试与最小部署使用。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _record: &LogRecord<'_>) {}

    fn enabled(&self, _severity: LogSeverity) -> bool {
        false
    }
}
