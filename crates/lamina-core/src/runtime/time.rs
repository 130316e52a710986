use core::time::Duration;

/// `MonotonicTimePoint` 以相对刻度表达单调时钟读数。
///
/// # 设计背景（Why）
/// - `std::time::Instant` 在 `no_std` 场景不可用；该结构提供等价的基本能力，
///   满足握手截止时间与优雅关闭轮询的计时需求。
///
/// # 逻辑解析（How）
/// - 内部以自运行时启动以来的偏移量（`Duration`）表示，避免依赖壁钟时间；
/// - 提供饱和加减，保证在不同计时分辨率下行为一致。
///
/// # 契约说明（What）
/// - **前置条件**：参与比较的时间点必须来自同一 [`super::OsFuncs`] 实例，
///   跨源比较没有意义。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(Duration);

impl MonotonicTimePoint {
    /// 运行时起点。
    pub const ZERO: Self = MonotonicTimePoint(Duration::ZERO);

    /// 根据启动以来的偏移量构造时间点。
    pub const fn from_offset(offset: Duration) -> Self {
        MonotonicTimePoint(offset)
    }

    /// 返回自启动以来的时间偏移。
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// 计算两个时间点的饱和差值。
    pub fn saturating_duration_since(&self, earlier: MonotonicTimePoint) -> Duration {
        self.0.checked_sub(earlier.0).unwrap_or(Duration::ZERO)
    }

    /// 在当前时间点上叠加偏移，饱和处理溢出。
    pub fn saturating_add(&self, delta: Duration) -> MonotonicTimePoint {
        MonotonicTimePoint(self.0.saturating_add(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_difference_never_underflows() {
        let early = MonotonicTimePoint::from_offset(Duration::from_millis(5));
        let late = MonotonicTimePoint::from_offset(Duration::from_millis(17));
        assert_eq!(
            late.saturating_duration_since(early),
            Duration::from_millis(12)
        );
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}
