//! 传感器子系统指标
//!
//! 所有计数器都是原子操作，传感器线程和控制循环可以同时读写，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 传感器实时指标
#[derive(Debug, Default)]
pub struct SensorMetrics {
    /// 完成的轮询周期总数（所有服务）
    pub polls: AtomicU64,
    /// 成功入队的报告数
    pub reports_published: AtomicU64,
    /// 队列满时被丢弃的最旧报告数
    ///
    /// 如果这个值持续增长，说明控制循环读取太慢或保留窗口太长。
    pub reports_dropped: AtomicU64,
    /// 可恢复的单次读数错误
    pub read_errors: AtomicU64,
    /// 超出保留窗口被清除的报告数
    pub reports_expired: AtomicU64,
    /// 进入 Dead 状态的服务数
    pub services_dead: AtomicU64,
}

impl SensorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            reports_published: self.reports_published.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            reports_expired: self.reports_expired.load(Ordering::Relaxed),
            services_dead: self.services_dead.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub reports_published: u64,
    pub reports_dropped: u64,
    pub read_errors: u64,
    pub reports_expired: u64,
    pub services_dead: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = SensorMetrics::new();
        metrics.polls.fetch_add(3, Ordering::Relaxed);
        metrics.reports_dropped.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.polls, 3);
        assert_eq!(snapshot.reports_dropped, 1);
        assert_eq!(snapshot.read_errors, 0);
    }
}
