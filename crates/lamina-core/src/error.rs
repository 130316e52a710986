use alloc::{borrow::Cow, boxed::Box};
use core::fmt;

use crate::common::Error;

/// 稳定错误码表，遵循 `<域>.<语义>` 命名约定。
///
/// # 设计背景（Why）
/// - 端点栈的控制流大量依赖"这是哪一类失败"的判定（立即返回、异步完成、读事件上抛），
///   字符串比较散落在调用点会导致语义漂移；集中定义错误码是唯一事实来源。
/// - 码值跨版本保持稳定，日志、指标与上层重试策略可以安全地据此聚合。
pub mod codes {
    /// 内存分配失败。
    pub const NO_MEMORY: &str = "endpoint.no_memory";
    /// 所请求能力未被过滤器或下层传输支持。
    pub const NOT_SUPPORTED: &str = "endpoint.not_supported";
    /// 参数非法。
    pub const INVALID_ARGUMENT: &str = "endpoint.invalid_argument";
    /// 端点状态不允许该操作（未打开时关闭、已打开时再次打开）。
    pub const NOT_READY: &str = "endpoint.not_ready";
    /// 资源已被占用（重复释放、重复移除）。
    pub const IN_USE: &str = "endpoint.in_use";
    /// 操作将异步完成，随后通过 done 回调收尾。
    pub const IN_PROGRESS: &str = "endpoint.in_progress";
    /// 对端关闭了连接。
    pub const REMOTE_CLOSED: &str = "endpoint.remote_closed";
    /// 握手截止时间耗尽。
    pub const TIMED_OUT: &str = "endpoint.timed_out";
    /// 关闭请求抢占了进行中的打开。
    pub const CANCELLED: &str = "endpoint.cancelled";
    /// 下层传输 I/O 错误。
    pub const TRANSPORT_IO: &str = "transport.io";
    /// 停止一个并未运行的定时器。
    pub const TIMER_NOT_RUNNING: &str = "timer.not_running";
    /// 运行时已经关停，不再受理新的注册。
    pub const RUNTIME_SHUTDOWN: &str = "runtime.shutdown";
    /// 协议帧解码失败（供过滤器实现复用）。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
}

/// `CoreError` 是栈运行时跨层共享的稳定错误形态。
///
/// # 设计背景（Why）
/// - 下层传输、过滤器与基础端点在不同层次产生的故障需要合流为统一结构，
///   才能保证"I/O 错误只以读事件上抛一次"这类传播策略可实施。
/// - 框架兼容 `no_std + alloc`，因此不依赖 `std::error::Error`，
///   而是实现 crate 内部的 [`Error`] 抽象。
///
/// # 契约说明（What）
/// - `code`：`'static` 稳定错误码，见 [`codes`]；
/// - `message`：面向排障人员的描述，不应包含敏感信息；
/// - `cause`：可选底层原因，构成错误链。
///
/// # 风险提示（Trade-offs）
/// - `message` 可能触发一次堆分配；热路径上建议复用 `&'static str` 字面量。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 契约说明（What）
    /// - **输入**：`code` 必须取自 [`codes`] 或遵循 `<域>.<语义>` 约定的自定义码；
    ///   `message` 支持静态与动态字符串。
    /// - **后置条件**：返回值拥有独立所有权，可跨线程传递（`Send + Sync`）。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 返回面向人的错误描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 返回底层原因（若存在）。
    pub fn cause(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }

    /// 判定是否为"异步完成"信号。
    ///
    /// # 设计背景（Why）
    /// - 打开/关闭路径普遍以 `in_progress` 区分同步完成与回调收尾，
    ///   谓词让调用点免于手写字符串比较。
    pub fn is_in_progress(&self) -> bool {
        self.code == codes::IN_PROGRESS
    }

    /// 判定是否为"状态不允许"错误。
    pub fn is_not_ready(&self) -> bool {
        self.code == codes::NOT_READY
    }

    /// 判定是否为能力缺失错误。
    pub fn is_not_supported(&self) -> bool {
        self.code == codes::NOT_SUPPORTED
    }

    /// 判定是否为对端关闭。
    pub fn is_remote_closed(&self) -> bool {
        self.code == codes::REMOTE_CLOSED
    }

    /// 快捷构造：异步完成信号。
    pub fn in_progress() -> Self {
        Self::new(codes::IN_PROGRESS, "operation will complete asynchronously")
    }

    /// 快捷构造：状态不允许。
    pub fn not_ready(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::NOT_READY, message)
    }

    /// 快捷构造：能力缺失。
    pub fn not_supported(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::NOT_SUPPORTED, message)
    }

    /// 快捷构造：对端关闭。
    pub fn remote_closed() -> Self {
        Self::new(codes::REMOTE_CLOSED, "peer closed the connection")
    }

    /// 快捷构造：打开被关闭请求抢占。
    pub fn cancelled() -> Self {
        Self::new(codes::CANCELLED, "open was cancelled by a racing close")
    }

    /// 快捷构造：握手超时。
    pub fn timed_out() -> Self {
        Self::new(codes::TIMED_OUT, "handshake deadline elapsed")
    }
}

impl Clone for CoreError {
    /// 克隆错误时仅保留码与消息；原因链无法克隆，退化为 `None`。
    ///
    /// # 风险提示（Trade-offs）
    /// - "同一错误上抛一次"的去重逻辑需要暂存错误副本，若保留原因链则要求
    ///   `dyn Error: Clone`，约束过强；丢弃原因链换取结构可复制。
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            cause: None,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(cause) = self.cause() {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause()
    }
}

impl From<fmt::Error> for CoreError {
    fn from(err: fmt::Error) -> Self {
        CoreError::new(codes::INVALID_ARGUMENT, "formatting failed").with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn code_and_message_round_trip() {
        let err = CoreError::new(codes::NOT_READY, "endpoint is closed");
        assert_eq!(err.code(), codes::NOT_READY);
        assert_eq!(err.message(), "endpoint is closed");
        assert!(err.cause().is_none(), "新建错误不应携带原因链");
        assert!(err.is_not_ready());
    }

    #[test]
    fn display_includes_cause_chain() {
        let err = CoreError::new(codes::TRANSPORT_IO, "write failed")
            .with_cause("connection reset by peer");
        let rendered = err.to_string();
        assert!(rendered.contains("transport.io"));
        assert!(rendered.contains("connection reset by peer"));
    }

    #[test]
    fn clone_drops_cause_but_keeps_code() {
        let err = CoreError::new(codes::REMOTE_CLOSED, "eof").with_cause("inner");
        let copied = err.clone();
        assert_eq!(copied.code(), codes::REMOTE_CLOSED);
        assert!(copied.cause().is_none());
    }
}
