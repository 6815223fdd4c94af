//! 管道错误类型

use green_hal::HalError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// 顶部槽位已有球，且未设置 override
    #[error("Top slot occupied; shift refused")]
    TopOccupied,

    /// 发射位仍有球，不能继续前移
    #[error("Ball still at shooter; load refused")]
    ShooterOccupied,

    /// 皮带执行器故障，管道冻结
    #[error("Indexer belt faulted: {0}")]
    BeltFaulted(HalError),

    /// 在超时内未到达目标位置
    #[error("Shift did not reach target within {timeout:?} (remaining {remaining_ticks:.0} ticks)")]
    ShiftTimeout {
        timeout: Duration,
        remaining_ticks: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::ShiftTimeout {
            timeout: Duration::from_millis(1500),
            remaining_ticks: 812.4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1.5s"));
        assert!(msg.contains("812"));

        assert_eq!(
            format!("{}", PipelineError::TopOccupied),
            "Top slot occupied; shift refused"
        );
    }
}
