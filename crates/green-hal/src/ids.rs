//! 执行器与传感器标识

use std::fmt;

/// 执行器标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MotorId {
    /// 进球滚轮
    Intake,
    /// 料斗搅拌电机
    Hopper,
    /// 索引器皮带（带编码器，位置模式）
    IndexerBelt,
    /// 发射轮（速度模式）
    ShooterWheel,
    /// 爬升伸缩电机
    ClimbExtend,
    /// 爬升绞盘电机
    ClimbWinch,
}

impl MotorId {
    pub const ALL: [MotorId; 6] = [
        MotorId::Intake,
        MotorId::Hopper,
        MotorId::IndexerBelt,
        MotorId::ShooterWheel,
        MotorId::ClimbExtend,
        MotorId::ClimbWinch,
    ];

    /// 遥测键名
    pub fn as_str(self) -> &'static str {
        match self {
            MotorId::Intake => "intake",
            MotorId::Hopper => "hopper",
            MotorId::IndexerBelt => "indexer_belt",
            MotorId::ShooterWheel => "shooter_wheel",
            MotorId::ClimbExtend => "climb_extend",
            MotorId::ClimbWinch => "climb_winch",
        }
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传感器标识
///
/// 前五个是沿弹道排列的光电对射传感器（从进球口到发射口），
/// 最后两个是爬升机构的挂杆接近开关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorId {
    IntakeEntry,
    HorizontalCorner,
    VerticalCorner,
    Top,
    ShooterExit,
    ClimbLeft,
    ClimbRight,
}

impl SensorId {
    /// 索引器沿线的光电传感器（物理顺序）
    pub const BREAK_BEAMS: [SensorId; 5] = [
        SensorId::IntakeEntry,
        SensorId::HorizontalCorner,
        SensorId::VerticalCorner,
        SensorId::Top,
        SensorId::ShooterExit,
    ];

    /// 爬升机构接近开关
    pub const CLIMB_SWITCHES: [SensorId; 2] = [SensorId::ClimbLeft, SensorId::ClimbRight];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorId::IntakeEntry => "intake_entry",
            SensorId::HorizontalCorner => "horizontal_corner",
            SensorId::VerticalCorner => "vertical_corner",
            SensorId::Top => "top",
            SensorId::ShooterExit => "shooter_exit",
            SensorId::ClimbLeft => "climb_left",
            SensorId::ClimbRight => "climb_right",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
