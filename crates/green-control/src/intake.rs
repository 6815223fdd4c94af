//! 进球机构与料斗
//!
//! 两个电机都以百分比输出运行：激活时使用配置的功率，关闭时为 0。
//! 激活状态同时决定管道是否接收入口的新球。

use crate::config::IntakeConfig;
use crate::error::RequestOutcome;
use green_hal::{Actuators, ControlMode, MotorId};
use green_indexer::BallPipeline;
use tracing::{info, warn};

const MOTORS: [MotorId; 2] = [MotorId::Intake, MotorId::Hopper];

pub struct IntakeController {
    config: IntakeConfig,
    active: bool,
    faulted: bool,
}

impl IntakeController {
    pub fn new(config: IntakeConfig) -> Self {
        Self {
            config,
            active: false,
            faulted: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 进球或料斗电机是否处于故障
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// 开关进球机构
    ///
    /// 任一电机故障时激活请求被拒绝（关闭请求总是生效）。
    pub fn set_active(
        &mut self,
        active: bool,
        pipeline: &mut BallPipeline,
        actuators: &mut Actuators,
    ) -> RequestOutcome {
        if active && MOTORS.iter().any(|&id| actuators.is_faulted(id)) {
            warn!("intake activation rejected: actuator faulted");
            self.faulted = true;
            return RequestOutcome::Rejected;
        }
        if active == self.active {
            return RequestOutcome::Ignored;
        }

        self.active = active;
        pipeline.set_accepting(active);
        if !self.drive(actuators) {
            self.shut_down(pipeline, actuators);
            return RequestOutcome::Rejected;
        }
        info!(active, "intake");
        RequestOutcome::Accepted
    }

    /// 每周期检查执行器故障；故障时关闭进球并停止接收
    pub fn tick(&mut self, pipeline: &mut BallPipeline, actuators: &mut Actuators) {
        let faulted = MOTORS.iter().any(|&id| actuators.is_faulted(id));
        if faulted && self.active {
            self.shut_down(pipeline, actuators);
        } else if !faulted && self.faulted {
            info!("intake actuators available again");
        }
        self.faulted = faulted;
    }

    fn power(&self, id: MotorId) -> f64 {
        match (self.active, id) {
            (false, _) => 0.0,
            (true, MotorId::Hopper) => self.config.hopper_power,
            (true, _) => self.config.intake_power,
        }
    }

    /// 下发两个电机的设定值，返回是否全部成功
    fn drive(&mut self, actuators: &mut Actuators) -> bool {
        let mut ok = true;
        for id in MOTORS {
            if let Err(e) = actuators.set_if_changed(id, ControlMode::PercentOutput, self.power(id)) {
                warn!(motor = %id, error = %e, "intake command failed");
                ok = false;
            }
        }
        ok
    }

    fn shut_down(&mut self, pipeline: &mut BallPipeline, actuators: &mut Actuators) {
        warn!("intake shut down: actuator faulted");
        self.active = false;
        self.faulted = true;
        pipeline.set_accepting(false);
        for id in MOTORS {
            actuators.stop(id);
        }
    }
}
