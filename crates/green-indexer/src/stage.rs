//! 球的位置（Stage）与球（Ball）

use green_hal::SensorId;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 球在管道中的位置，严格按物理顺序排列
///
/// 每个 Stage 是一个单列槽位，同一时刻最多容纳一个球。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Stage {
    Entering = 0,
    BottomCorner = 1,
    InCorner = 2,
    VerticalCorner = 3,
    Unbuffered = 4,
    Top = 5,
    Shooting = 6,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Entering,
        Stage::BottomCorner,
        Stage::InCorner,
        Stage::VerticalCorner,
        Stage::Unbuffered,
        Stage::Top,
        Stage::Shooting,
    ];

    pub const FIRST: Stage = Stage::Entering;
    pub const LAST: Stage = Stage::Shooting;

    /// 下一个位置；`Shooting` 之后返回 `None`（已被发射）
    pub fn next(self) -> Option<Stage> {
        Stage::try_from(u8::from(self) + 1).ok()
    }

    /// 上一个位置；`Entering` 之前返回 `None`（从入口退出）
    pub fn prev(self) -> Option<Stage> {
        u8::from(self)
            .checked_sub(1)
            .and_then(|v| Stage::try_from(v).ok())
    }

    /// 球到达该位置时应当被遮挡的光电开关
    pub fn expected_sensor(self) -> Option<SensorId> {
        match self {
            Stage::BottomCorner => Some(SensorId::HorizontalCorner),
            Stage::VerticalCorner => Some(SensorId::VerticalCorner),
            Stage::Top => Some(SensorId::Top),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Entering => "entering",
            Stage::BottomCorner => "bottom_corner",
            Stage::InCorner => "in_corner",
            Stage::VerticalCorner => "vertical_corner",
            Stage::Unbuffered => "unbuffered",
            Stage::Top => "top",
            Stage::Shooting => "shooting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 管道中的一个球
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    /// 单调递增 ID
    pub id: u64,
    pub stage: Stage,
    /// 进入当前位置时皮带编码器的读数（ticks）
    pub entry_tick_position: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_prev_walk_every_stage() {
        let mut stage = Stage::FIRST;
        let mut forward = vec![stage];
        while let Some(next) = stage.next() {
            forward.push(next);
            stage = next;
        }
        assert_eq!(forward, Stage::ALL);
        assert_eq!(stage, Stage::LAST);

        for window in Stage::ALL.windows(2) {
            assert_eq!(window[1].prev(), Some(window[0]));
        }
        assert_eq!(Stage::Entering.prev(), None);
        assert_eq!(Stage::Shooting.next(), None);
    }

    #[test]
    fn test_expected_sensors() {
        assert_eq!(Stage::BottomCorner.expected_sensor(), Some(SensorId::HorizontalCorner));
        assert_eq!(Stage::VerticalCorner.expected_sensor(), Some(SensorId::VerticalCorner));
        assert_eq!(Stage::Top.expected_sensor(), Some(SensorId::Top));
        assert_eq!(Stage::Entering.expected_sensor(), None);
        assert_eq!(Stage::Shooting.expected_sensor(), None);
    }
}
