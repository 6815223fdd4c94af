//! 瞄准输入
//!
//! 视觉/炮塔子系统被简化为一个标量：目标的水平偏角（度）。
//! 控制循环每周期按需轮询一次，`None` 表示当前没有目标。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 目标水平偏角来源
pub trait TargetingInput: Send {
    /// 当前水平偏角（度）；没有目标时返回 `None`
    fn horizontal_offset_deg(&mut self) -> Option<f64>;
}

impl<F> TargetingInput for F
where
    F: FnMut() -> Option<f64> + Send,
{
    fn horizontal_offset_deg(&mut self) -> Option<f64> {
        self()
    }
}

/// 永远没有目标
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTarget;

impl TargetingInput for NoTarget {
    fn horizontal_offset_deg(&mut self) -> Option<f64> {
        None
    }
}

/// 固定偏角（台架测试用）
#[derive(Debug, Clone, Copy)]
pub struct FixedTarget(pub f64);

impl TargetingInput for FixedTarget {
    fn horizontal_offset_deg(&mut self) -> Option<f64> {
        Some(self.0)
    }
}

/// 可跨线程更新的偏角
///
/// 外部线程通过克隆的句柄写入，控制循环读取；无锁。
#[derive(Debug, Clone, Default)]
pub struct SharedTarget {
    inner: Arc<SharedTargetInner>,
}

#[derive(Debug, Default)]
struct SharedTargetInner {
    bits: AtomicU64,
    valid: AtomicBool,
}

impl SharedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, offset_deg: f64) {
        self.inner.bits.store(offset_deg.to_bits(), Ordering::Relaxed);
        self.inner.valid.store(true, Ordering::Release);
    }

    /// 目标丢失
    pub fn clear(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    pub fn get(&self) -> Option<f64> {
        if self.inner.valid.load(Ordering::Acquire) {
            Some(f64::from_bits(self.inner.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }
}

impl TargetingInput for SharedTarget {
    fn horizontal_offset_deg(&mut self) -> Option<f64> {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_target() {
        let mut target = SharedTarget::new();
        let writer = target.clone();
        assert_eq!(target.horizontal_offset_deg(), None);

        writer.set(-0.75);
        assert_eq!(target.horizontal_offset_deg(), Some(-0.75));

        writer.clear();
        assert_eq!(target.horizontal_offset_deg(), None);
    }

    #[test]
    fn test_closure_input() {
        let mut calls = 0;
        let mut input = move || {
            calls += 1;
            Some(calls as f64)
        };
        assert_eq!(input.horizontal_offset_deg(), Some(1.0));
        assert_eq!(input.horizontal_offset_deg(), Some(2.0));
        assert_eq!(NoTarget.horizontal_offset_deg(), None);
        assert_eq!(FixedTarget(0.5).horizontal_offset_deg(), Some(0.5));
    }
}
