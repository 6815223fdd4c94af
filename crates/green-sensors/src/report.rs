//! 传感器报告（Report）
//!
//! 报告类型是一个封闭集合，每种类型同时也是一个**谓词**：
//! [`ReportKind::build`] 只在满足该类型的跳变条件时返回 `Some(Report)`，
//! 不满足时返回 `None`（正常的过滤结果，不是错误）。

use green_hal::SensorId;
use std::time::Duration;

/// 报告类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReportKind {
    /// 任意变化（previous != current）
    Transition,
    /// 上升沿：光束被遮挡（false → true）
    Blocked,
    /// 下降沿：光束恢复（true → false）
    Cleared,
}

impl ReportKind {
    pub const ALL: [ReportKind; 3] = [ReportKind::Transition, ReportKind::Blocked, ReportKind::Cleared];

    /// 尝试构造报告
    ///
    /// 不满足跳变条件时返回 `None`。
    pub fn build(
        self,
        sensor: SensorId,
        previous: bool,
        current: bool,
        timestamp_us: u64,
    ) -> Option<Report> {
        let matches = match self {
            ReportKind::Transition => previous != current,
            ReportKind::Blocked => !previous && current,
            ReportKind::Cleared => previous && !current,
        };
        matches.then_some(Report {
            kind: self,
            sensor,
            previous,
            current,
            timestamp_us,
            seq: 0,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Transition => "transition",
            ReportKind::Blocked => "blocked",
            ReportKind::Cleared => "cleared",
        }
    }
}

/// 传感器报告（不可变值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    pub sensor: SensorId,
    pub previous: bool,
    pub current: bool,
    /// 采样时间（微秒，见 [`green_hal::Clock`]）
    pub timestamp_us: u64,
    /// 管理器入队序号（全局单调递增，入队前为 0）
    pub seq: u64,
}

impl Report {
    /// 报告年龄
    pub fn age(&self, now_us: u64) -> Duration {
        Duration::from_micros(now_us.saturating_sub(self.timestamp_us))
    }

    /// 是否超出保留窗口
    pub fn is_expired(&self, now_us: u64, retention: Duration) -> bool {
        self.age(now_us) > retention
    }
}
