//! 执行器门面（Actuator Facade）
//!
//! 所有电机命令都经过这里。控制器一旦返回错误，对应执行器进入**粘滞故障**状态：
//! - 之后的 `set()` 一律是空操作，返回 [`HalError::Unavailable`]
//! - 故障只能通过 [`Actuators::clear_fault`] 显式清除
//! - `stop()` 例外：始终尽力下发零输出，错误只记录不传播

use crate::{ControlMode, HalError, MotorController, MotorId};
use std::collections::HashMap;
use tracing::{error, info, trace};

/// 最近一次成功下发的命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCommand {
    pub mode: ControlMode,
    pub value: f64,
}

struct MotorSlot {
    controller: Box<dyn MotorController>,
    fault: Option<HalError>,
    last_command: Option<MotorCommand>,
}

/// 执行器门面
///
/// 由组合根（composition root）构造一次，以 `&mut` 传给各状态机的 `tick()`。
///
/// # Example
///
/// ```rust,ignore
/// // 需要启用 `mock` feature
/// use green_hal::mock::MockMotor;
/// use green_hal::{Actuators, ControlMode, MotorId};
///
/// let (motor, handle) = MockMotor::new();
/// let mut actuators = Actuators::new().with_motor(MotorId::Intake, motor);
///
/// actuators.set(MotorId::Intake, ControlMode::PercentOutput, 0.8).unwrap();
/// assert_eq!(handle.last_command().unwrap().1, 0.8);
/// ```
#[derive(Default)]
pub struct Actuators {
    motors: HashMap<MotorId, MotorSlot>,
}

impl Actuators {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式注册执行器
    pub fn with_motor(mut self, id: MotorId, controller: impl MotorController + 'static) -> Self {
        self.register(id, Box::new(controller));
        self
    }

    /// 注册（或替换）执行器，替换时清除旧的故障状态
    pub fn register(&mut self, id: MotorId, controller: Box<dyn MotorController>) {
        self.motors.insert(
            id,
            MotorSlot {
                controller,
                fault: None,
                last_command: None,
            },
        );
    }

    pub fn contains(&self, id: MotorId) -> bool {
        self.motors.contains_key(&id)
    }

    /// 下发设定值
    ///
    /// 故障状态下为空操作。
    pub fn set(&mut self, id: MotorId, mode: ControlMode, value: f64) -> Result<(), HalError> {
        let slot = self.slot_mut(id)?;
        if slot.fault.is_some() {
            return Err(HalError::Unavailable(id));
        }
        match slot.controller.set(mode, value) {
            Ok(()) => {
                trace!(motor = %id, ?mode, value, "motor command");
                slot.last_command = Some(MotorCommand { mode, value });
                Ok(())
            },
            Err(e) => Err(Self::latch(id, slot, e)),
        }
    }

    /// 仅在设定值变化时下发，返回是否真正下发
    ///
    /// 控制循环每周期都会计算期望设定值，用它避免重复占用总线。
    pub fn set_if_changed(&mut self, id: MotorId, mode: ControlMode, value: f64) -> Result<bool, HalError> {
        if self.last_command(id) == Some(MotorCommand { mode, value }) && !self.is_faulted(id) {
            return Ok(false);
        }
        self.set(id, mode, value).map(|()| true)
    }

    /// 读取编码器位置（ticks）
    pub fn position(&mut self, id: MotorId) -> Result<f64, HalError> {
        let slot = self.slot_mut(id)?;
        if slot.fault.is_some() {
            return Err(HalError::Unavailable(id));
        }
        slot.controller.position().map_err(|e| Self::latch(id, slot, e))
    }

    /// 读取编码器速度（ticks/100ms）
    pub fn velocity(&mut self, id: MotorId) -> Result<f64, HalError> {
        let slot = self.slot_mut(id)?;
        if slot.fault.is_some() {
            return Err(HalError::Unavailable(id));
        }
        slot.controller.velocity().map_err(|e| Self::latch(id, slot, e))
    }

    /// 改写编码器位置
    pub fn set_position(&mut self, id: MotorId, ticks: f64) -> Result<(), HalError> {
        let slot = self.slot_mut(id)?;
        if slot.fault.is_some() {
            return Err(HalError::Unavailable(id));
        }
        slot.controller
            .set_position(ticks)
            .map_err(|e| Self::latch(id, slot, e))
    }

    /// 停止电机
    ///
    /// 即使处于故障状态也会尝试下发零输出（安全状态优先），失败只记录日志。
    pub fn stop(&mut self, id: MotorId) {
        let Some(slot) = self.motors.get_mut(&id) else {
            return;
        };
        match slot.controller.stop() {
            Ok(()) => {
                slot.last_command = Some(MotorCommand {
                    mode: ControlMode::PercentOutput,
                    value: 0.0,
                });
            },
            Err(e) => {
                if slot.fault.is_none() {
                    Self::latch(id, slot, e);
                }
            },
        }
    }

    /// 停止所有电机
    pub fn stop_all(&mut self) {
        let ids: Vec<MotorId> = self.motors.keys().copied().collect();
        for id in ids {
            self.stop(id);
        }
    }

    /// 执行器是否不可用（故障或未注册）
    pub fn is_faulted(&self, id: MotorId) -> bool {
        self.motors.get(&id).is_none_or(|slot| slot.fault.is_some())
    }

    pub fn fault(&self, id: MotorId) -> Option<&HalError> {
        self.motors.get(&id).and_then(|slot| slot.fault.as_ref())
    }

    /// 所有处于故障状态的执行器
    pub fn faulted(&self) -> Vec<MotorId> {
        let mut ids: Vec<MotorId> = self
            .motors
            .iter()
            .filter(|(_, slot)| slot.fault.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// 显式清除故障
    pub fn clear_fault(&mut self, id: MotorId) {
        if let Some(slot) = self.motors.get_mut(&id)
            && slot.fault.take().is_some()
        {
            info!(motor = %id, "actuator fault cleared");
        }
    }

    pub fn last_command(&self, id: MotorId) -> Option<MotorCommand> {
        self.motors.get(&id).and_then(|slot| slot.last_command)
    }

    fn slot_mut(&mut self, id: MotorId) -> Result<&mut MotorSlot, HalError> {
        self.motors.get_mut(&id).ok_or(HalError::UnknownMotor(id))
    }

    fn latch(id: MotorId, slot: &mut MotorSlot, e: HalError) -> HalError {
        error!(motor = %id, error = %e, "actuator fault latched");
        slot.fault = Some(e.clone());
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMotor;

    #[test]
    fn test_set_records_last_command() {
        let (motor, handle) = MockMotor::new();
        let mut actuators = Actuators::new().with_motor(MotorId::ShooterWheel, motor);

        actuators
            .set(MotorId::ShooterWheel, ControlMode::Velocity, 20_000.0)
            .unwrap();

        assert_eq!(
            actuators.last_command(MotorId::ShooterWheel),
            Some(MotorCommand {
                mode: ControlMode::Velocity,
                value: 20_000.0
            })
        );
        assert_eq!(handle.last_command(), Some((ControlMode::Velocity, 20_000.0)));
    }

    #[test]
    fn test_fault_is_sticky_until_cleared() {
        let (motor, handle) = MockMotor::new();
        let mut actuators = Actuators::new().with_motor(MotorId::IndexerBelt, motor);

        handle.fail_next(HalError::Fault("overcurrent".into()));
        let err = actuators
            .set(MotorId::IndexerBelt, ControlMode::PercentOutput, 0.5)
            .unwrap_err();
        assert!(matches!(err, HalError::Fault(_)));
        assert!(actuators.is_faulted(MotorId::IndexerBelt));

        // 后续命令是空操作
        let commands_before = handle.command_count();
        let err = actuators
            .set(MotorId::IndexerBelt, ControlMode::PercentOutput, 0.5)
            .unwrap_err();
        assert_eq!(err, HalError::Unavailable(MotorId::IndexerBelt));
        assert_eq!(handle.command_count(), commands_before);
        assert!(actuators.position(MotorId::IndexerBelt).is_err());

        actuators.clear_fault(MotorId::IndexerBelt);
        assert!(!actuators.is_faulted(MotorId::IndexerBelt));
        actuators
            .set(MotorId::IndexerBelt, ControlMode::PercentOutput, 0.5)
            .unwrap();
    }

    #[test]
    fn test_read_failure_latches_fault() {
        let (motor, handle) = MockMotor::new();
        let mut actuators = Actuators::new().with_motor(MotorId::IndexerBelt, motor);

        handle.fail_next(HalError::Disconnected("can id 40".into()));
        assert!(actuators.velocity(MotorId::IndexerBelt).is_err());
        assert_eq!(actuators.faulted(), vec![MotorId::IndexerBelt]);
    }

    #[test]
    fn test_stop_is_attempted_while_faulted() {
        let (motor, handle) = MockMotor::new();
        let mut actuators = Actuators::new().with_motor(MotorId::Hopper, motor);

        handle.fail_next(HalError::Fault("x".into()));
        let _ = actuators.set(MotorId::Hopper, ControlMode::PercentOutput, 1.0);
        assert!(actuators.is_faulted(MotorId::Hopper));

        actuators.stop(MotorId::Hopper);
        assert_eq!(handle.last_command(), Some((ControlMode::PercentOutput, 0.0)));
        // 停止不会清除故障
        assert!(actuators.is_faulted(MotorId::Hopper));
    }

    #[test]
    fn test_set_if_changed_skips_duplicates() {
        let (motor, handle) = MockMotor::new();
        let mut actuators = Actuators::new().with_motor(MotorId::ShooterWheel, motor);

        assert_eq!(
            actuators.set_if_changed(MotorId::ShooterWheel, ControlMode::Velocity, 20_000.0),
            Ok(true)
        );
        assert_eq!(
            actuators.set_if_changed(MotorId::ShooterWheel, ControlMode::Velocity, 20_000.0),
            Ok(false)
        );
        assert_eq!(
            actuators.set_if_changed(MotorId::ShooterWheel, ControlMode::PercentOutput, 0.0),
            Ok(true)
        );
        assert_eq!(handle.command_count(), 2);
    }

    #[test]
    fn test_unknown_motor() {
        let mut actuators = Actuators::new();
        assert!(actuators.is_faulted(MotorId::Intake));
        assert_eq!(
            actuators.set(MotorId::Intake, ControlMode::PercentOutput, 1.0),
            Err(HalError::UnknownMotor(MotorId::Intake))
        );
        // 未注册的执行器 stop 是空操作
        actuators.stop(MotorId::Intake);
    }
}
