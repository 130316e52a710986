//! lamina 契约测试套件（TCK）入口。
//!
//! # 教案式综述（Why / How / What）
//! - **为什么存在**：栈运行时的正确性全部落在并发状态机的细节上——打开与
//!   关闭的时序、回调重入、缓冲重投、带外排水。把这些校验集中为独立
//!   crate，传输驱动与过滤器实现可以按同一把尺自测。
//! - **如何集成**：在目标仓库的 `tests` 目录调用 `run_*` 入口（或一次性
//!   `run_all`），即可把完整套件编译为标准 Rust 测试。
//! - **测试对象**：以 `lamina-core` 的稳定面为边界，从端点生命周期不变量
//!   到具体并发场景（关闭抢占打开、握手超时、优雅关闭轮询、短写带外
//!   记录）逐一断言。全部用例跑在确定性测试运行时上：无真实套接字、
//!   无 sleep，虚拟时钟驱动一切定时行为。
//!
//! # 模块结构
//! - `case`：用例与套件的元信息结构体，以及统一执行辅助；
//! - `support`：回环夹具（内存管道 + 两端端点）与握手打桩过滤器；
//! - 其余子模块分别实现六大主题的断言逻辑。

mod backpressure;
mod cancellation;
mod graceful_shutdown;
mod oob;
mod roundtrip;
mod state_machine;
pub mod support;

use case::{TckSuite, run_suite};

const ALL_SUITES: [&TckSuite; 6] = [
    state_machine::suite(),
    cancellation::suite(),
    graceful_shutdown::suite(),
    backpressure::suite(),
    oob::suite(),
    roundtrip::suite(),
];

mod case {
    use std::panic;

    /// 单个契约用例的元信息。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：以结构体封装测试函数与名称，统一遍历与失败定位，
    ///   避免入口函数里硬编码字符串。
    /// - **契约 (What)**：`test` 失败时必须 panic；名称用于失败提示。
    #[derive(Clone, Copy)]
    pub struct TckCase {
        /// 用例名称。
        pub name: &'static str,
        /// 实际执行的断言逻辑。
        pub test: fn(),
    }

    /// 同一主题的一组契约用例。
    #[derive(Clone, Copy)]
    pub struct TckSuite {
        /// 主题名称。
        pub name: &'static str,
        /// 用例表。
        pub cases: &'static [TckCase],
    }

    /// 顺序执行套件内全部用例，失败时带上主题与用例名重新抛出。
    pub fn run_suite(suite: &TckSuite) {
        for case in suite.cases {
            if let Err(payload) = panic::catch_unwind(|| (case.test)()) {
                eprintln!("contract case failed: {}::{}", suite.name, case.name);
                panic::resume_unwind(payload);
            }
        }
    }
}

/// 运行"状态机"主题：生命周期不变量与同步拒绝语义。
pub fn run_state_machine() {
    run_suite(state_machine::suite());
}

/// 运行"取消"主题：关闭抢占打开与握手超时。
pub fn run_cancellation() {
    run_suite(cancellation::suite());
}

/// 运行"优雅关闭"主题：排空、轮询与硬停。
pub fn run_graceful_shutdown() {
    run_suite(graceful_shutdown::suite());
}

/// 运行"背压"主题：短读重投、零消费与只写模式。
pub fn run_backpressure() {
    run_suite(backpressure::suite());
}

/// 运行"带外"主题：FIFO、短写与排水恢复。
pub fn run_oob() {
    run_suite(oob::suite());
}

/// 运行"回环"主题：分帧过滤器的端到端透明性。
pub fn run_roundtrip() {
    run_suite(roundtrip::suite());
}

/// 顺序运行全部主题。
pub fn run_all() {
    for suite in ALL_SUITES {
        run_suite(suite);
    }
}
