//! Mock 硬件（无硬件依赖）
//!
//! 每个 mock 设备都返回一对 `(设备, 句柄)`：设备交给被测代码，
//! 句柄留在测试里用于注入读数、故障，以及检查下发过的命令。

use crate::{ControlMode, DigitalInput, HalError, MotorController};
use parking_lot::Mutex;
use std::sync::Arc;

/// 百分比输出为 1.0 时 mock 电机的空载转速（ticks/100ms）
pub const MOCK_FREE_SPEED: f64 = 21_000.0;

#[derive(Debug)]
struct MotorState {
    position: f64,
    velocity: f64,
    mode: ControlMode,
    setpoint: f64,
    commands: Vec<(ControlMode, f64)>,
    fail_next: Option<HalError>,
    fail_always: Option<HalError>,
    /// 位置模式下每次读位置前进的 ticks；`None` 表示瞬间到位
    travel_per_read: Option<f64>,
    /// 每次读速度时向目标靠近的量；`None` 表示速度完全由句柄控制
    velocity_ramp_per_read: Option<f64>,
}

impl MotorState {
    fn check_fail(&mut self) -> Result<(), HalError> {
        if let Some(e) = self.fail_next.take() {
            return Err(e);
        }
        if let Some(e) = &self.fail_always {
            return Err(e.clone());
        }
        Ok(())
    }

    fn velocity_target(&self) -> f64 {
        match self.mode {
            ControlMode::Velocity => self.setpoint,
            ControlMode::PercentOutput => self.setpoint * MOCK_FREE_SPEED,
            ControlMode::Position | ControlMode::MotionMagic => 0.0,
        }
    }
}

/// Mock 电机控制器
pub struct MockMotor {
    state: Arc<Mutex<MotorState>>,
}

/// Mock 电机句柄
#[derive(Clone)]
pub struct MockMotorHandle {
    state: Arc<Mutex<MotorState>>,
}

impl MockMotor {
    pub fn new() -> (Self, MockMotorHandle) {
        let state = Arc::new(Mutex::new(MotorState {
            position: 0.0,
            velocity: 0.0,
            mode: ControlMode::PercentOutput,
            setpoint: 0.0,
            commands: Vec::new(),
            fail_next: None,
            fail_always: None,
            travel_per_read: None,
            velocity_ramp_per_read: None,
        }));
        (
            Self {
                state: state.clone(),
            },
            MockMotorHandle { state },
        )
    }
}

impl MotorController for MockMotor {
    fn set(&mut self, mode: ControlMode, value: f64) -> Result<(), HalError> {
        let mut s = self.state.lock();
        s.check_fail()?;
        s.commands.push((mode, value));
        s.mode = mode;
        s.setpoint = value;
        if mode.is_position() && s.travel_per_read.is_none() {
            s.position = value;
        }
        Ok(())
    }

    fn position(&mut self) -> Result<f64, HalError> {
        let mut s = self.state.lock();
        s.check_fail()?;
        if s.mode.is_position()
            && let Some(step) = s.travel_per_read
        {
            let remaining = s.setpoint - s.position;
            if remaining.abs() <= step {
                s.position = s.setpoint;
            } else {
                s.position += step * remaining.signum();
            }
        }
        Ok(s.position)
    }

    fn velocity(&mut self) -> Result<f64, HalError> {
        let mut s = self.state.lock();
        s.check_fail()?;
        if let Some(ramp) = s.velocity_ramp_per_read {
            let target = s.velocity_target();
            let diff = target - s.velocity;
            if diff.abs() <= ramp {
                s.velocity = target;
            } else {
                s.velocity += ramp * diff.signum();
            }
        }
        Ok(s.velocity)
    }

    fn set_position(&mut self, ticks: f64) -> Result<(), HalError> {
        let mut s = self.state.lock();
        s.check_fail()?;
        s.position = ticks;
        Ok(())
    }
}

impl MockMotorHandle {
    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn set_position(&self, ticks: f64) {
        self.state.lock().position = ticks;
    }

    pub fn velocity(&self) -> f64 {
        self.state.lock().velocity
    }

    /// 设置测得速度（速度由句柄控制时使用）
    pub fn set_velocity(&self, velocity: f64) {
        self.state.lock().velocity = velocity;
    }

    pub fn mode(&self) -> ControlMode {
        self.state.lock().mode
    }

    pub fn setpoint(&self) -> f64 {
        self.state.lock().setpoint
    }

    pub fn last_command(&self) -> Option<(ControlMode, f64)> {
        self.state.lock().commands.last().copied()
    }

    pub fn commands(&self) -> Vec<(ControlMode, f64)> {
        self.state.lock().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.state.lock().commands.len()
    }

    /// 位置类命令的数量（用于断言"没有重复下发 shift"）
    pub fn position_command_count(&self) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|(mode, _)| mode.is_position())
            .count()
    }

    /// 下一次调用失败
    pub fn fail_next(&self, e: HalError) {
        self.state.lock().fail_next = Some(e);
    }

    /// 之后所有调用都失败，直到 [`recover`](Self::recover)
    pub fn fail_always(&self, e: HalError) {
        self.state.lock().fail_always = Some(e);
    }

    pub fn recover(&self) {
        let mut s = self.state.lock();
        s.fail_next = None;
        s.fail_always = None;
    }

    /// 位置模式下每次读位置前进的距离；`None` 恢复为瞬间到位
    pub fn set_travel_per_read(&self, step: Option<f64>) {
        self.state.lock().travel_per_read = step;
    }

    /// 速度跟随设定值的斜率；`None` 表示速度完全由句柄控制
    pub fn set_velocity_ramp(&self, ramp: Option<f64>) {
        self.state.lock().velocity_ramp_per_read = ramp;
    }
}

#[derive(Debug)]
struct InputState {
    value: bool,
    fail: Option<HalError>,
    reads: u64,
}

/// Mock 数字输入
pub struct MockInput {
    state: Arc<Mutex<InputState>>,
}

/// Mock 数字输入句柄
#[derive(Clone)]
pub struct MockInputHandle {
    state: Arc<Mutex<InputState>>,
}

impl MockInput {
    pub fn new(initial: bool) -> (Self, MockInputHandle) {
        let state = Arc::new(Mutex::new(InputState {
            value: initial,
            fail: None,
            reads: 0,
        }));
        (
            Self {
                state: state.clone(),
            },
            MockInputHandle { state },
        )
    }
}

impl DigitalInput for MockInput {
    fn read(&mut self) -> Result<bool, HalError> {
        let mut s = self.state.lock();
        s.reads += 1;
        match &s.fail {
            Some(e) => Err(e.clone()),
            None => Ok(s.value),
        }
    }
}

impl MockInputHandle {
    pub fn set(&self, value: bool) {
        self.state.lock().value = value;
    }

    pub fn get(&self) -> bool {
        self.state.lock().value
    }

    /// 之后的读数都失败，直到 [`recover`](Self::recover)
    pub fn fail_with(&self, e: HalError) {
        self.state.lock().fail = Some(e);
    }

    pub fn recover(&self) {
        self.state.lock().fail = None;
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_mode_travels_per_read() {
        let (mut motor, handle) = MockMotor::new();
        handle.set_travel_per_read(Some(100.0));

        motor.set(ControlMode::Position, 250.0).unwrap();
        assert_eq!(motor.position().unwrap(), 100.0);
        assert_eq!(motor.position().unwrap(), 200.0);
        assert_eq!(motor.position().unwrap(), 250.0);
        assert_eq!(motor.position().unwrap(), 250.0);

        // 反向
        motor.set(ControlMode::Position, 0.0).unwrap();
        assert_eq!(motor.position().unwrap(), 150.0);
    }

    #[test]
    fn test_position_mode_instant_by_default() {
        let (mut motor, _handle) = MockMotor::new();
        motor.set(ControlMode::MotionMagic, 6844.0).unwrap();
        assert_eq!(motor.position().unwrap(), 6844.0);
    }

    #[test]
    fn test_velocity_ramp() {
        let (mut motor, handle) = MockMotor::new();
        handle.set_velocity_ramp(Some(5_000.0));
        motor.set(ControlMode::Velocity, 12_000.0).unwrap();
        assert_eq!(motor.velocity().unwrap(), 5_000.0);
        assert_eq!(motor.velocity().unwrap(), 10_000.0);
        assert_eq!(motor.velocity().unwrap(), 12_000.0);

        motor.stop().unwrap();
        assert_eq!(motor.velocity().unwrap(), 7_000.0);
    }

    #[test]
    fn test_fail_next_only_once() {
        let (mut motor, handle) = MockMotor::new();
        handle.fail_next(HalError::Fault("x".into()));
        assert!(motor.velocity().is_err());
        assert!(motor.velocity().is_ok());
    }

    #[test]
    fn test_input_failure_and_recovery() {
        let (mut input, handle) = MockInput::new(false);
        assert_eq!(input.read(), Ok(false));
        handle.set(true);
        assert_eq!(input.read(), Ok(true));
        handle.fail_with(HalError::InvalidReading("noise".into()));
        assert!(input.read().is_err());
        handle.recover();
        assert_eq!(input.read(), Ok(true));
        assert_eq!(handle.reads(), 4);
    }
}
