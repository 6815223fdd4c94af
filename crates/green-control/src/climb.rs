//! 爬升机构
//!
//! 伸缩电机带编码器，用 MotionMagic 在 0 与 `ticks_to_full` 之间移动；
//! 绞盘电机以百分比输出把机器人拉起。
//!
//! ```text
//! LOWERED ──extend──→ RISING ──到位──→ RAISED ──lift──→ LIFTING ──回零──→ LOWERED
//!    ↑                  │                 │
//!    └──── LOWERING ←───┴──── lower ──────┘
//! ```

use crate::config::ClimbConfig;
use crate::error::RequestOutcome;
use green_hal::{Actuators, ControlMode, HalError, MotorId, SensorId};
use green_sensors::{Report, ReportKind};
use tracing::{debug, error, info, warn};

const EXTEND: MotorId = MotorId::ClimbExtend;
const WINCH: MotorId = MotorId::ClimbWinch;

/// 爬升状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClimbState {
    Lowered,
    Rising,
    Raised,
    Lowering,
    Lifting,
}

impl ClimbState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClimbState::Lowered => "lowered",
            ClimbState::Rising => "rising",
            ClimbState::Raised => "raised",
            ClimbState::Lowering => "lowering",
            ClimbState::Lifting => "lifting",
        }
    }

    /// 静止状态（不下发命令）
    pub fn is_stable(self) -> bool {
        matches!(self, ClimbState::Lowered | ClimbState::Raised)
    }
}

/// 挂杆接近开关
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarContact {
    pub left: bool,
    pub right: bool,
}

impl BarContact {
    pub fn both(self) -> bool {
        self.left && self.right
    }
}

pub struct ClimbController {
    config: ClimbConfig,
    state: ClimbState,
    position: f64,
    contact: BarContact,
    stop_requested: bool,
    faulted: bool,
}

impl ClimbController {
    pub fn new(config: ClimbConfig) -> Self {
        Self {
            config,
            state: ClimbState::Lowered,
            position: 0.0,
            contact: BarContact::default(),
            stop_requested: false,
            faulted: false,
        }
    }

    pub fn state(&self) -> ClimbState {
        self.state
    }

    /// 最近一次读到的伸缩编码器位置
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn bar_contact(&self) -> BarContact {
        self.contact
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// 伸出挂钩
    pub fn request_extend(&mut self) -> RequestOutcome {
        if self.faulted {
            return RequestOutcome::Rejected;
        }
        match self.state {
            ClimbState::Lowered | ClimbState::Lowering => {
                self.transition(ClimbState::Rising);
                RequestOutcome::Accepted
            },
            ClimbState::Rising | ClimbState::Raised => RequestOutcome::Ignored,
            ClimbState::Lifting => {
                debug!("extend rejected while lifting");
                RequestOutcome::Rejected
            },
        }
    }

    /// 收回挂钩并用绞盘拉起机器人
    pub fn request_lift(&mut self) -> RequestOutcome {
        if self.faulted {
            return RequestOutcome::Rejected;
        }
        match self.state {
            ClimbState::Raised => {
                if !self.contact.both() {
                    warn!(
                        left = self.contact.left,
                        right = self.contact.right,
                        "lifting without full bar contact"
                    );
                }
                self.transition(ClimbState::Lifting);
                RequestOutcome::Accepted
            },
            ClimbState::Lifting => RequestOutcome::Ignored,
            state => {
                debug!(state = state.as_str(), "lift rejected: hooks not raised");
                RequestOutcome::Rejected
            },
        }
    }

    /// 不拉起机器人，直接收回挂钩
    pub fn request_lower(&mut self) -> RequestOutcome {
        if self.faulted {
            return RequestOutcome::Rejected;
        }
        match self.state {
            ClimbState::Raised | ClimbState::Rising => {
                self.transition(ClimbState::Lowering);
                RequestOutcome::Accepted
            },
            ClimbState::Lowering | ClimbState::Lowered => RequestOutcome::Ignored,
            ClimbState::Lifting => RequestOutcome::Rejected,
        }
    }

    /// 停止两个电机，下一个周期生效
    pub fn request_stop(&mut self) -> RequestOutcome {
        if self.state.is_stable() {
            return RequestOutcome::Ignored;
        }
        self.stop_requested = true;
        RequestOutcome::Accepted
    }

    /// 推进一个控制周期
    pub fn tick(&mut self, reports: &[Report], actuators: &mut Actuators) -> ClimbState {
        for report in reports {
            self.handle_report(report);
        }

        if let Some(id) = [EXTEND, WINCH].into_iter().find(|&id| actuators.is_faulted(id)) {
            let fault = actuators.fault(id).cloned().unwrap_or(HalError::UnknownMotor(id));
            self.freeze(fault, actuators);
            return self.state;
        }
        if self.faulted {
            info!("climb actuators available again");
            self.faulted = false;
        }

        if self.stop_requested {
            self.stop_requested = false;
            actuators.stop(EXTEND);
            actuators.stop(WINCH);
            let settled = self.nearest_stable();
            info!(position = self.position, state = settled.as_str(), "climb stopped");
            self.transition(settled);
            return self.state;
        }

        if self.state.is_stable() {
            return self.state;
        }

        if let Err(e) = self.drive(actuators) {
            self.freeze(e, actuators);
        }
        self.state
    }

    fn drive(&mut self, actuators: &mut Actuators) -> Result<(), HalError> {
        let (target, winch) = match self.state {
            ClimbState::Rising => (self.config.ticks_to_full, 0.0),
            ClimbState::Lowering => (0.0, 0.0),
            ClimbState::Lifting => (0.0, self.config.winch_power),
            ClimbState::Lowered | ClimbState::Raised => return Ok(()),
        };
        actuators.set_if_changed(EXTEND, ControlMode::MotionMagic, target)?;
        actuators.set_if_changed(WINCH, ControlMode::PercentOutput, winch)?;

        self.position = actuators.position(EXTEND)?;
        if (self.position - target).abs() > self.config.position_tolerance_ticks {
            return Ok(());
        }
        match self.state {
            ClimbState::Rising => self.transition(ClimbState::Raised),
            ClimbState::Lifting => {
                actuators.set_if_changed(WINCH, ControlMode::PercentOutput, 0.0)?;
                self.transition(ClimbState::Lowered);
            },
            _ => self.transition(ClimbState::Lowered),
        }
        Ok(())
    }

    fn handle_report(&mut self, report: &Report) {
        if report.kind != ReportKind::Transition {
            return;
        }
        match report.sensor {
            SensorId::ClimbLeft => self.contact.left = report.current,
            SensorId::ClimbRight => self.contact.right = report.current,
            _ => return,
        }
        debug!(sensor = %report.sensor, contact = report.current, "bar contact changed");
    }

    fn nearest_stable(&self) -> ClimbState {
        if self.position >= self.config.ticks_to_full / 2.0 {
            ClimbState::Raised
        } else {
            ClimbState::Lowered
        }
    }

    fn freeze(&mut self, fault: HalError, actuators: &mut Actuators) {
        if self.faulted {
            return;
        }
        error!(error = %fault, state = self.state.as_str(), "climb faulted, mechanism frozen");
        self.faulted = true;
        self.stop_requested = false;
        actuators.stop(EXTEND);
        actuators.stop(WINCH);
        let settled = self.nearest_stable();
        self.transition(settled);
    }

    fn transition(&mut self, next: ClimbState) {
        if self.state != next {
            info!(from = self.state.as_str(), to = next.as_str(), "climb state");
            self.state = next;
        }
    }
}
