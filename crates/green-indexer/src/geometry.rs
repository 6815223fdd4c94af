//! 皮带几何参数

use std::f64::consts::PI;

/// 皮带几何参数
///
/// 一次 shift 让皮带前进一个球径：
///
/// ```text
/// required_ticks = ball_diameter · ticks_per_rev / (2π · wheel_radius)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeltGeometry {
    /// 球直径（m）
    pub ball_diameter_m: f64,
    /// 皮带轮半径（m）
    pub wheel_radius_m: f64,
    /// 编码器每转 ticks
    pub ticks_per_rev: u32,
}

impl Default for BeltGeometry {
    fn default() -> Self {
        Self {
            ball_diameter_m: 0.2,
            wheel_radius_m: 0.009525,
            ticks_per_rev: 2048,
        }
    }
}

impl BeltGeometry {
    /// 移动一个槽位所需的编码器 ticks
    ///
    /// # Example
    ///
    /// ```
    /// use green_indexer::BeltGeometry;
    ///
    /// let ticks = BeltGeometry::default().required_ticks();
    /// assert!((ticks - 6844.08).abs() < 0.01);
    /// ```
    pub fn required_ticks(&self) -> f64 {
        self.ball_diameter_m * self.ticks_per_rev as f64 / (2.0 * PI * self.wheel_radius_m)
    }

    /// 皮带周长（m）
    pub fn circumference_m(&self) -> f64 {
        2.0 * PI * self.wheel_radius_m
    }

    pub fn is_valid(&self) -> bool {
        self.ball_diameter_m > 0.0 && self.wheel_radius_m > 0.0 && self.ticks_per_rev > 0
    }
}
