//! # Green HAL
//!
//! 硬件抽象层，控制核心只通过这里的 trait 与电机控制器、数字输入交互。
//!
//! - [`MotorController`]：单个速度控制器（百分比/速度/位置/MotionMagic 设定值 + 编码器遥测）
//! - [`DigitalInput`]：单个布尔传感器（光电对射、限位开关）
//! - [`Actuators`]：执行器门面，带粘滞故障标志（sticky fault）
//! - [`Clock`]：单调时钟（[`SystemClock`] 用于真实运行，[`ManualClock`] 用于测试）
//!
//! 启用 `mock` feature 后可使用 [`mock`] 模块中的内存实现。

mod actuators;
mod clock;
mod ids;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use actuators::{Actuators, MotorCommand};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{MotorId, SensorId};

use thiserror::Error;

/// HAL 统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalError {
    /// 设备断开（不可恢复，调用方应停止使用该设备）
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    /// 单次读数无效（可恢复，跳过本次即可）
    #[error("Invalid reading: {0}")]
    InvalidReading(String),
    /// 控制器报告故障
    #[error("Controller fault: {0}")]
    Fault(String),
    /// 执行器处于粘滞故障状态，命令被当作空操作
    #[error("Actuator {0} unavailable (sticky fault)")]
    Unavailable(MotorId),
    /// 执行器未注册
    #[error("Actuator {0} not registered")]
    UnknownMotor(MotorId),
}

impl HalError {
    /// 是否为致命错误（传感器服务遇到后应标记为 Dead）
    pub fn is_fatal(&self) -> bool {
        matches!(self, HalError::Disconnected(_))
    }
}

/// 电机控制模式
///
/// 与常见 CAN 速度控制器的控制模式一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMode {
    /// 百分比输出，取值 [-1.0, 1.0]
    PercentOutput,
    /// 闭环速度，单位 ticks/100ms
    Velocity,
    /// 闭环位置，单位 ticks
    Position,
    /// 带运动曲线的位置控制，单位 ticks
    MotionMagic,
}

impl ControlMode {
    /// 是否为位置类模式（Position / MotionMagic）
    pub fn is_position(self) -> bool {
        matches!(self, ControlMode::Position | ControlMode::MotionMagic)
    }
}

/// 电机控制器抽象
///
/// 实现方负责与真实硬件通信。所有方法都必须是非阻塞的（控制循环会在每个周期调用）。
pub trait MotorController: Send {
    /// 下发设定值
    fn set(&mut self, mode: ControlMode, value: f64) -> Result<(), HalError>;

    /// 读取编码器位置（ticks）
    fn position(&mut self) -> Result<f64, HalError>;

    /// 读取编码器速度（ticks/100ms）
    fn velocity(&mut self) -> Result<f64, HalError>;

    /// 改写编码器当前位置（通常用于清零）
    fn set_position(&mut self, ticks: f64) -> Result<(), HalError>;

    /// 停止电机（输出置零）
    fn stop(&mut self) -> Result<(), HalError> {
        self.set(ControlMode::PercentOutput, 0.0)
    }
}

/// 数字输入抽象（光电对射 / 限位开关）
///
/// `true` 表示光束被遮挡（有球）或开关闭合。
pub trait DigitalInput: Send {
    fn read(&mut self) -> Result<bool, HalError>;
}

impl<T: MotorController + ?Sized> MotorController for Box<T> {
    fn set(&mut self, mode: ControlMode, value: f64) -> Result<(), HalError> {
        (**self).set(mode, value)
    }

    fn position(&mut self) -> Result<f64, HalError> {
        (**self).position()
    }

    fn velocity(&mut self) -> Result<f64, HalError> {
        (**self).velocity()
    }

    fn set_position(&mut self, ticks: f64) -> Result<(), HalError> {
        (**self).set_position(ticks)
    }

    fn stop(&mut self) -> Result<(), HalError> {
        (**self).stop()
    }
}

impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn read(&mut self) -> Result<bool, HalError> {
        (**self).read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_error_display() {
        let err = HalError::Disconnected("dio 3".to_string());
        assert_eq!(format!("{}", err), "Device disconnected: dio 3");

        let err = HalError::Unavailable(MotorId::IndexerBelt);
        let msg = format!("{}", err);
        assert!(msg.contains("indexer_belt") && msg.contains("sticky"));
    }

    #[test]
    fn test_only_disconnect_is_fatal() {
        assert!(HalError::Disconnected("x".into()).is_fatal());
        assert!(!HalError::InvalidReading("x".into()).is_fatal());
        assert!(!HalError::Fault("x".into()).is_fatal());
        assert!(!HalError::Unavailable(MotorId::Intake).is_fatal());
    }

    #[test]
    fn test_control_mode_is_position() {
        assert!(ControlMode::Position.is_position());
        assert!(ControlMode::MotionMagic.is_position());
        assert!(!ControlMode::Velocity.is_position());
        assert!(!ControlMode::PercentOutput.is_position());
    }
}
