//! 发射器起转协调器
//!
//! ```text
//! STOPPED → SPOOLING → WAITING → SHOOTING → SLOWING → STOPPED
//!              ↑          │          │          │
//!              └──────────┴──────────┘          └──→ SPOOLING（停稳前再次起转）
//! ```
//!
//! - SPOOLING → WAITING：转速连续 `debounce_cycles` 个周期落在 `target ± tolerance` 内
//! - WAITING → SHOOTING：已装填（armed）+ 顶部有球 + 瞄准在容差内 + 皮带空闲
//! - SHOOTING 结束：球离开发射器（出口光电），或 shift 完成后超过 `shot_timeout`
//!
//! 协调器从不直接驱动皮带，只通过 [`BallPipeline`] 的公开入口发起 shift。

use crate::config::ShooterConfig;
use crate::error::RequestOutcome;
use green_hal::{Actuators, ControlMode, HalError, MotorId};
use green_indexer::{BallPipeline, ShiftOutcome, ShiftTicket, Stage};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WHEEL: MotorId = MotorId::ShooterWheel;

/// 发射器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShooterState {
    Stopped,
    Spooling,
    Waiting,
    Shooting,
    Slowing,
}

impl ShooterState {
    pub fn as_str(self) -> &'static str {
        match self {
            ShooterState::Stopped => "stopped",
            ShooterState::Spooling => "spooling",
            ShooterState::Waiting => "waiting",
            ShooterState::Shooting => "shooting",
            ShooterState::Slowing => "slowing",
        }
    }

    /// 发射轮应以闭环速度运行
    pub fn is_spinning(self) -> bool {
        matches!(
            self,
            ShooterState::Spooling | ShooterState::Waiting | ShooterState::Shooting
        )
    }
}

/// 正在发射的球
#[derive(Debug, Clone, Copy)]
struct Shot {
    ticket: ShiftTicket,
    ball: u64,
    committed_us: Option<u64>,
}

/// 发射器起转协调器
pub struct ShooterCoordinator {
    config: ShooterConfig,
    band: (f64, f64),
    state: ShooterState,
    armed: bool,
    in_band_count: u32,
    measured_velocity: f64,
    shot: Option<Shot>,
    faulted: bool,
    shots_fired: u64,
}

impl ShooterCoordinator {
    pub fn new(config: ShooterConfig) -> Self {
        Self {
            band: config.velocity_band(),
            config,
            state: ShooterState::Stopped,
            armed: false,
            in_band_count: 0,
            measured_velocity: 0.0,
            shot: None,
            faulted: false,
            shots_fired: 0,
        }
    }

    // ==================== 请求入口 ====================

    /// 起转（STOPPED / SLOWING → SPOOLING）
    pub fn request_spool(&mut self) -> RequestOutcome {
        if self.faulted {
            warn!("spool rejected: shooter wheel faulted");
            return RequestOutcome::Rejected;
        }
        match self.state {
            ShooterState::Stopped | ShooterState::Slowing => {
                self.transition(ShooterState::Spooling);
                RequestOutcome::Accepted
            },
            _ => RequestOutcome::Ignored,
        }
    }

    /// 装填：之后每个到达顶部的球都会被发射，直到 cease fire
    pub fn request_shoot(&mut self) -> RequestOutcome {
        if self.faulted {
            warn!("shoot rejected: shooter wheel faulted");
            return RequestOutcome::Rejected;
        }
        match self.state {
            ShooterState::Spooling | ShooterState::Waiting => {
                if self.armed {
                    return RequestOutcome::Ignored;
                }
                self.armed = true;
                info!(state = self.state.as_str(), "shooter armed");
                RequestOutcome::Accepted
            },
            ShooterState::Shooting => RequestOutcome::Ignored,
            ShooterState::Stopped | ShooterState::Slowing => {
                debug!(state = self.state.as_str(), "shoot rejected: wheel not spooled");
                RequestOutcome::Rejected
            },
        }
    }

    /// 停火：当前这一球仍会打完，随后减速
    pub fn request_cease_fire(&mut self) -> RequestOutcome {
        match self.state {
            ShooterState::Spooling | ShooterState::Waiting => {
                self.armed = false;
                self.transition(ShooterState::Slowing);
                RequestOutcome::Accepted
            },
            ShooterState::Shooting => {
                self.armed = false;
                debug!("cease fire: finishing current shot");
                RequestOutcome::Accepted
            },
            ShooterState::Stopped | ShooterState::Slowing => RequestOutcome::Ignored,
        }
    }

    /// 立即停止，取消尚未完成的发射 shift
    pub fn request_stop(&mut self, pipeline: &mut BallPipeline) -> RequestOutcome {
        if self.state == ShooterState::Stopped && self.shot.is_none() {
            return RequestOutcome::Ignored;
        }
        self.cancel_shot(pipeline);
        self.armed = false;
        self.transition(ShooterState::Stopped);
        RequestOutcome::Accepted
    }

    // ==================== 查询 ====================

    pub fn state(&self) -> ShooterState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn measured_velocity(&self) -> f64 {
        self.measured_velocity
    }

    pub fn target_velocity(&self) -> f64 {
        self.config.target_velocity
    }

    /// 当前转速是否在带内
    pub fn at_speed(&self) -> bool {
        self.in_band(self.measured_velocity)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn shots_fired(&self) -> u64 {
        self.shots_fired
    }

    /// 正在发射的 shift 凭据
    pub fn shot_ticket(&self) -> Option<ShiftTicket> {
        self.shot.map(|s| s.ticket)
    }

    pub fn config(&self) -> &ShooterConfig {
        &self.config
    }

    // ==================== 控制循环 ====================

    /// 推进一个控制周期（非阻塞）
    ///
    /// `aim` 是本周期轮询到的目标水平偏角。
    pub fn tick(
        &mut self,
        now_us: u64,
        pipeline: &mut BallPipeline,
        actuators: &mut Actuators,
        aim: Option<f64>,
    ) -> ShooterState {
        if actuators.is_faulted(WHEEL) {
            let fault = actuators
                .fault(WHEEL)
                .cloned()
                .unwrap_or(HalError::UnknownMotor(WHEEL));
            self.enter_fault(fault, pipeline, actuators);
            return self.state;
        }
        if self.faulted {
            info!("shooter wheel fault cleared");
            self.faulted = false;
        }

        match actuators.velocity(WHEEL) {
            Ok(velocity) => self.measured_velocity = velocity,
            Err(e) => {
                self.enter_fault(e, pipeline, actuators);
                return self.state;
            },
        }
        if self.in_band(self.measured_velocity) {
            self.in_band_count = self.in_band_count.saturating_add(1);
        } else {
            self.in_band_count = 0;
        }

        match self.state {
            ShooterState::Stopped => {},
            ShooterState::Spooling => {
                if self.in_band_count >= self.config.debounce_cycles {
                    self.transition(ShooterState::Waiting);
                }
            },
            ShooterState::Waiting => {
                if self.in_band_count == 0 {
                    self.transition(ShooterState::Spooling);
                } else if self.ready_to_fire(pipeline, aim) {
                    self.fire(now_us, pipeline);
                }
            },
            ShooterState::Shooting => self.poll_shot(now_us, pipeline),
            ShooterState::Slowing => {
                if self.measured_velocity.abs() <= self.config.stopped_velocity {
                    self.transition(ShooterState::Stopped);
                }
            },
        }

        let (mode, value) = if self.state.is_spinning() {
            (ControlMode::Velocity, self.config.target_velocity)
        } else {
            (ControlMode::PercentOutput, 0.0)
        };
        if let Err(e) = actuators.set_if_changed(WHEEL, mode, value) {
            self.enter_fault(e, pipeline, actuators);
        }
        self.state
    }

    fn in_band(&self, velocity: f64) -> bool {
        let (low, high) = self.band;
        velocity >= low && velocity <= high
    }

    fn aim_ok(&self, aim: Option<f64>) -> bool {
        match aim {
            Some(offset) => offset.abs() <= self.config.aim_tolerance_deg,
            None => !self.config.require_target,
        }
    }

    fn ready_to_fire(&self, pipeline: &BallPipeline, aim: Option<f64>) -> bool {
        self.armed
            && pipeline.check_top()
            && !pipeline.is_shifting()
            && !pipeline.is_faulted()
            && self.aim_ok(aim)
    }

    fn fire(&mut self, now_us: u64, pipeline: &mut BallPipeline) {
        let Some(ball) = pipeline.ball_at(Stage::Top).map(|b| b.id) else {
            return;
        };
        match pipeline.request_shift_forward(true) {
            Ok(ticket) => {
                info!(
                    %ticket,
                    ball,
                    velocity = self.measured_velocity,
                    now_us,
                    "firing"
                );
                self.shot = Some(Shot {
                    ticket,
                    ball,
                    committed_us: None,
                });
                self.transition(ShooterState::Shooting);
            },
            Err(e) => debug!(error = %e, "fire request refused by pipeline"),
        }
    }

    fn poll_shot(&mut self, now_us: u64, pipeline: &mut BallPipeline) {
        let Some(mut shot) = self.shot else {
            self.finish_shot();
            return;
        };

        match pipeline.outcome(shot.ticket) {
            None => {},
            Some(ShiftOutcome::Cancelled) => {
                warn!(ticket = %shot.ticket, "shot shift cancelled, ball not fired");
                self.shot = None;
                self.after_shot();
            },
            Some(ShiftOutcome::Aborted(e)) => {
                warn!(ticket = %shot.ticket, error = %e, "shot shift aborted, ball not fired");
                self.shot = None;
                self.after_shot();
            },
            Some(ShiftOutcome::Committed) => {
                let committed_us = *shot.committed_us.get_or_insert(now_us);
                self.shot = Some(shot);

                if pipeline.balls().iter().all(|b| b.id != shot.ball) {
                    self.finish_shot();
                    return;
                }

                let waited = Duration::from_micros(now_us.saturating_sub(committed_us));
                if waited > self.config.shot_timeout() {
                    warn!(
                        ball = shot.ball,
                        waited_ms = waited.as_millis() as u64,
                        "shooter exit never reported, assuming ball left"
                    );
                    pipeline.confirm_shot_exit();
                    self.finish_shot();
                }
            },
        }
    }

    fn finish_shot(&mut self) {
        self.shot = None;
        self.shots_fired += 1;
        info!(shots = self.shots_fired, "shot complete");
        self.after_shot();
    }

    fn after_shot(&mut self) {
        let next = if !self.armed {
            ShooterState::Slowing
        } else if self.in_band_count > 0 {
            ShooterState::Waiting
        } else {
            ShooterState::Spooling
        };
        self.transition(next);
    }

    fn cancel_shot(&mut self, pipeline: &mut BallPipeline) {
        let Some(shot) = self.shot.take() else {
            return;
        };
        match pipeline.outcome(shot.ticket) {
            None => {
                pipeline.request_stop();
                info!(ticket = %shot.ticket, "shot shift cancelled by stop");
            },
            // 球已送进发射轮，不会再回到管道
            Some(ShiftOutcome::Committed) => {
                if pipeline.ball_at(Stage::Shooting).is_some_and(|b| b.id == shot.ball) {
                    pipeline.confirm_shot_exit();
                }
                self.shots_fired += 1;
                info!(ball = shot.ball, shots = self.shots_fired, "stopped after shot committed");
            },
            Some(_) => {},
        }
    }

    fn enter_fault(&mut self, fault: HalError, pipeline: &mut BallPipeline, actuators: &mut Actuators) {
        if self.faulted {
            return;
        }
        error!(error = %fault, state = self.state.as_str(), "shooter wheel faulted");
        self.faulted = true;
        self.cancel_shot(pipeline);
        self.armed = false;
        self.measured_velocity = 0.0;
        self.transition(ShooterState::Stopped);
        actuators.stop(WHEEL);
    }

    fn transition(&mut self, next: ShooterState) {
        if self.state == next {
            return;
        }
        info!(
            from = self.state.as_str(),
            to = next.as_str(),
            velocity = self.measured_velocity,
            "shooter state"
        );
        if next == ShooterState::Spooling {
            self.in_band_count = 0;
        }
        self.state = next;
    }
}
