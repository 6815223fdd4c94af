//! 单调时钟
//!
//! 所有时间戳都是"自应用启动以来的微秒数"：
//! - 单调递增，不受系统时间调整（NTP、手动修改）影响
//! - 可以直接存进 `AtomicU64`，跨线程无锁读取

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 全局时间锚点，首次访问时设置，之后不再改变
static APP_START: OnceLock<Instant> = OnceLock::new();

fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// 时钟抽象
///
/// 传感器线程与控制循环共享同一个时钟（`Arc<dyn Clock>`），保证时间戳可比较。
pub trait Clock: Send + Sync {
    /// 当前时间（微秒）
    fn now_us(&self) -> u64;

    /// 从 `since_us` 到现在经过的时间
    fn elapsed_since(&self, since_us: u64) -> Duration {
        Duration::from_micros(self.now_us().saturating_sub(since_us))
    }
}

/// 真实单调时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        monotonic_micros()
    }
}

/// 手动推进的时钟（测试用）
///
/// # Example
///
/// ```
/// use green_hal::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(90));
/// assert_eq!(clock.now_us(), 90_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(us),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_us.fetch_add(by.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, us: u64) {
        self.now_us.store(us, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let t1 = clock.now_us();
        thread::sleep(Duration::from_millis(5));
        let t2 = clock.now_us();
        assert!(t2 > t1, "Monotonic time should always increase");
    }

    #[test]
    fn test_manual_clock_elapsed() {
        let clock = ManualClock::starting_at(1_000);
        clock.advance(Duration::from_millis(2));
        assert_eq!(clock.now_us(), 3_000);
        assert_eq!(clock.elapsed_since(1_000), Duration::from_millis(2));
        // 未来时间戳不会下溢
        assert_eq!(clock.elapsed_since(10_000), Duration::ZERO);
    }
}
