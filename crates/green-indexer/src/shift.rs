//! Shift 操作
//!
//! 一次 shift 让皮带前进（或后退）一个球径。球的位置只在操作**完成**时整体推进，
//! 中途取消或中止不会产生部分推进。

use crate::error::PipelineError;
use green_hal::SensorId;
use std::fmt;

/// 移动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftDirection {
    /// 朝发射器方向
    Forward,
    /// 朝入口方向（卡球恢复）
    Back,
}

impl ShiftDirection {
    pub fn sign(self) -> f64 {
        match self {
            ShiftDirection::Forward => 1.0,
            ShiftDirection::Back => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShiftDirection::Forward => "forward",
            ShiftDirection::Back => "back",
        }
    }
}

/// shift 请求凭据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShiftTicket(pub u64);

impl fmt::Display for ShiftTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shift#{}", self.0)
    }
}

/// shift 请求的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum ShiftOutcome {
    /// 到达目标，所有球推进一格
    Committed,
    /// 被后续命令取代或被 stop 取消
    Cancelled,
    /// 超时、执行器故障或被拒绝
    Aborted(PipelineError),
}

impl ShiftOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ShiftOutcome::Committed)
    }
}

/// 进行中的 shift
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftOperation {
    pub ticket: ShiftTicket,
    pub direction: ShiftDirection,
    /// 开始时的编码器读数
    pub start_ticks: f64,
    /// 目标编码器读数
    pub target_ticks: f64,
    pub started_us: u64,
    /// 领头球到达新位置时应被遮挡的光电开关
    pub expected_sensor: Option<SensorId>,
    /// 预期光电开关实际触发的时间
    pub sensor_seen_us: Option<u64>,
    /// 移动期间检测到的入口边沿
    pub entries_during: u32,
    /// 移动期间检测到的发射出口边沿
    pub exit_seen: bool,
    pub(crate) inconsistency_reported: bool,
}

impl ShiftOperation {
    pub(crate) fn new(
        ticket: ShiftTicket,
        direction: ShiftDirection,
        start_ticks: f64,
        required_ticks: f64,
        started_us: u64,
        expected_sensor: Option<SensorId>,
    ) -> Self {
        Self {
            ticket,
            direction,
            start_ticks,
            target_ticks: start_ticks + direction.sign() * required_ticks,
            started_us,
            expected_sensor,
            sensor_seen_us: None,
            entries_during: 0,
            exit_seen: false,
            inconsistency_reported: false,
        }
    }

    /// 命令的位移（带符号）
    pub fn commanded_delta(&self) -> f64 {
        self.target_ticks - self.start_ticks
    }

    pub fn remaining(&self, position: f64) -> f64 {
        self.target_ticks - position
    }

    pub fn is_complete(&self, position: f64, tolerance: f64) -> bool {
        self.remaining(position).abs() <= tolerance
    }

    /// 完成比例，限制在 [0, 1]
    pub fn progress(&self, position: f64) -> f64 {
        let delta = self.commanded_delta();
        if delta == 0.0 {
            return 1.0;
        }
        ((position - self.start_ticks) / delta).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_shift_targets_negative_delta() {
        let op = ShiftOperation::new(ShiftTicket(1), ShiftDirection::Back, 1000.0, 400.0, 0, None);
        assert_eq!(op.target_ticks, 600.0);
        assert_eq!(op.commanded_delta(), -400.0);
        assert_eq!(op.progress(800.0), 0.5);
        assert!(op.is_complete(630.0, 40.0));
        assert!(!op.is_complete(650.0, 40.0));
    }

    #[test]
    fn test_progress_is_clamped() {
        let op = ShiftOperation::new(ShiftTicket(1), ShiftDirection::Forward, 0.0, 100.0, 0, None);
        assert_eq!(op.progress(-50.0), 0.0);
        assert_eq!(op.progress(150.0), 1.0);
    }
}
