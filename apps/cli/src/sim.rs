//! 台架模拟硬件
//!
//! 电机全部是 mock：发射轮按斜率跟随设定值，皮带和伸缩电机每次读位置前进固定行程。
//! 光电开关由 [`SimHardware`] 根据遥测中的球位置回填，入口和出口用单周期脉冲模拟。

use anyhow::{Context, Result};
use green_control::{RobotConfig, TelemetrySnapshot};
use green_hal::mock::{MockInput, MockInputHandle, MockMotor};
use green_hal::{Actuators, Clock, MotorId, SensorId};
use green_sensors::{SensorManager, ServiceKind, ServiceSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 发射轮每次读速度逼近设定值的量（ticks/100ms）
const WHEEL_RAMP: f64 = 2_000.0;
/// 位置模式下每次读位置前进的行程（ticks）
const BELT_TRAVEL: f64 = 1_500.0;
const CLIMB_TRAVEL: f64 = 2_500.0;

/// 有固定光电开关的位置
const STAGE_BEAMS: [(SensorId, &str); 3] = [
    (SensorId::HorizontalCorner, "bottom_corner"),
    (SensorId::VerticalCorner, "vertical_corner"),
    (SensorId::Top, "top"),
];

pub struct SimHardware {
    pub sensors: Arc<SensorManager>,
    inputs: HashMap<SensorId, MockInputHandle>,
    /// 上周期拉高、本周期要释放的脉冲
    releases: Vec<SensorId>,
}

impl SimHardware {
    /// 构造传感器服务和 mock 执行器（执行器交给 `Robot`）
    pub fn build(config: &RobotConfig, clock: Arc<dyn Clock>) -> Result<(Self, Actuators)> {
        let mut actuators = Actuators::new();
        for id in MotorId::ALL {
            let (motor, handle) = MockMotor::new();
            match id {
                MotorId::ShooterWheel => handle.set_velocity_ramp(Some(WHEEL_RAMP)),
                MotorId::IndexerBelt => handle.set_travel_per_read(Some(BELT_TRAVEL)),
                MotorId::ClimbExtend => handle.set_travel_per_read(Some(CLIMB_TRAVEL)),
                _ => {},
            }
            actuators.register(id, Box::new(motor));
        }

        let sensors = Arc::new(SensorManager::new(config.sensors.manager_config(), clock));
        let mut inputs = HashMap::new();

        let mut beams = ServiceSpec::new(ServiceKind::BreakBeam);
        for sensor in SensorId::BREAK_BEAMS {
            let (input, handle) = MockInput::new(false);
            beams = beams.with_input(sensor, input);
            inputs.insert(sensor, handle);
        }
        sensors
            .add_service(beams)
            .context("failed to start break-beam service")?;

        let mut climb = ServiceSpec::new(ServiceKind::ClimbProximity);
        for sensor in SensorId::CLIMB_SWITCHES {
            let (input, handle) = MockInput::new(false);
            climb = climb.with_input(sensor, input);
            inputs.insert(sensor, handle);
        }
        sensors
            .add_service(climb)
            .context("failed to start climb proximity service")?;

        let sim = Self {
            sensors,
            inputs,
            releases: Vec::new(),
        };
        Ok((sim, actuators))
    }

    fn set(&self, sensor: SensorId, value: bool) {
        if let Some(handle) = self.inputs.get(&sensor) {
            handle.set(value);
        }
    }

    /// 释放上周期的脉冲（每个控制周期开始时调用）
    pub fn begin_cycle(&mut self) {
        for sensor in std::mem::take(&mut self.releases) {
            self.set(sensor, false);
        }
    }

    /// 拉高一个周期
    pub fn pulse(&mut self, sensor: SensorId) {
        if self.releases.contains(&sensor) {
            return;
        }
        debug!(%sensor, "sim pulse");
        self.set(sensor, true);
        self.releases.push(sensor);
    }

    /// 按球的位置设置沿线光电开关
    pub fn mirror_stages(&self, snapshot: &TelemetrySnapshot) {
        for (sensor, stage) in STAGE_BEAMS {
            let occupied = snapshot.pipeline.balls.iter().any(|b| b.stage == stage);
            self.set(sensor, occupied);
        }
    }
}
