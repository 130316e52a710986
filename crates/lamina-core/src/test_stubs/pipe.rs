//! 内存管道驱动：把 [`LoopRuntime`] 的管道端接进句柄下层。

use alloc::sync::Arc;
use core::time::Duration;

use spin::Mutex;

use crate::{
    Result,
    error::CoreError,
    fd::{ClosePhase, CloseCheck, FdDriver, SubOpen},
    runtime::SysFd,
    test_stubs::runtime::LoopRuntime,
};

/// `PipeDriver` 为一条内存管道端实现 [`FdDriver`]。
///
/// # 契约说明（What）
/// - `sub_open` 交出预先创建的管道端，可配置为同步完成或模拟异步连接
///   （写就绪后由 `check_open` 放行）；
/// - `check_close` 可配置为轮询 N 次后放行，模拟内核侧排空。
pub struct PipeDriver {
    fd: Mutex<Option<SysFd>>,
    async_connect: bool,
    close_polls: Mutex<usize>,
    close_poll_delay: Duration,
}

impl PipeDriver {
    /// 同步连接的管道驱动。
    pub fn new(fd: SysFd) -> Arc<PipeDriver> {
        Arc::new(PipeDriver {
            fd: Mutex::new(Some(fd)),
            async_connect: false,
            close_polls: Mutex::new(0),
            close_poll_delay: Duration::ZERO,
        })
    }

    /// 模拟异步连接：`sub_open` 返回在途，写就绪时连接完成。
    pub fn with_async_connect(fd: SysFd) -> Arc<PipeDriver> {
        Arc::new(PipeDriver {
            fd: Mutex::new(Some(fd)),
            async_connect: true,
            close_polls: Mutex::new(0),
            close_poll_delay: Duration::ZERO,
        })
    }

    /// 模拟优雅关闭：`check_close(Done)` 先返回 `polls` 次重试。
    pub fn with_close_polls(fd: SysFd, polls: usize, delay: Duration) -> Arc<PipeDriver> {
        Arc::new(PipeDriver {
            fd: Mutex::new(Some(fd)),
            async_connect: false,
            close_polls: Mutex::new(polls),
            close_poll_delay: delay,
        })
    }

    /// 便捷构造：服务端接入路径直接把句柄交给 [`crate::fd::FdLl::alloc`]，
    /// 驱动自身不再持有句柄。
    pub fn accepted(_rt: &Arc<LoopRuntime>) -> Arc<PipeDriver> {
        Arc::new(PipeDriver {
            fd: Mutex::new(None),
            async_connect: false,
            close_polls: Mutex::new(0),
            close_poll_delay: Duration::ZERO,
        })
    }
}

impl FdDriver for PipeDriver {
    fn sub_open(&self) -> Result<SubOpen> {
        let fd = self
            .fd
            .lock()
            .take()
            .ok_or_else(|| CoreError::not_ready("pipe end already handed out"))?;
        if self.async_connect {
            Ok(SubOpen::InProgress(fd))
        } else {
            Ok(SubOpen::Open(fd))
        }
    }

    fn check_close(&self, phase: ClosePhase) -> CloseCheck {
        if phase == ClosePhase::Done {
            let mut polls = self.close_polls.lock();
            if *polls > 0 {
                *polls -= 1;
                return CloseCheck::RetryAfter(self.close_poll_delay);
            }
        }
        CloseCheck::Done
    }
}
