//! 组合根（Composition Root）
//!
//! [`Robot`] 在启动时构造所有子系统一次，并拥有它们；没有全局单例。
//! 控制循环以固定频率调用 [`Robot::tick`]，操作员输入层调用 `request_*` 入口。
//!
//! # 单周期顺序
//!
//! 1. 通过游标读取新的传感器报告（上升沿/下降沿按到达顺序合并）
//! 2. 进球机构（故障检查）
//! 3. 球管道
//! 4. 发射器（使用本周期轮询到的瞄准偏角）
//! 5. 爬升机构
//! 6. 发布遥测快照

use crate::climb::ClimbController;
use crate::config::RobotConfig;
use crate::error::{ControlError, RequestOutcome};
use crate::intake::IntakeController;
use crate::shooter::{ShooterCoordinator, ShooterState};
use crate::targeting::TargetingInput;
use crate::telemetry::{
    BallTelemetry, ClimbTelemetry, IntakeTelemetry, PipelineTelemetry, SensorTelemetry,
    ShooterTelemetry, TelemetryPublisher, TelemetrySnapshot,
};
use green_hal::{Actuators, Clock, MotorId};
use green_indexer::BallPipeline;
use green_sensors::{Report, ReportCursor, ReportKind, SensorManager};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 每个报告类型一个游标
#[derive(Debug, Default)]
struct Cursors {
    blocked: ReportCursor,
    cleared: ReportCursor,
    transition: ReportCursor,
}

/// 机器人控制核心
pub struct Robot {
    config: RobotConfig,
    actuators: Actuators,
    sensors: Arc<SensorManager>,
    targeting: Box<dyn TargetingInput>,
    clock: Arc<dyn Clock>,
    pipeline: BallPipeline,
    shooter: ShooterCoordinator,
    intake: IntakeController,
    climb: ClimbController,
    telemetry: TelemetryPublisher,
    cursors: Cursors,
    cycle: u64,
    starved: bool,
}

impl Robot {
    /// 构造所有子系统
    ///
    /// 配置非法或缺少任一执行器时失败。
    pub fn new(
        config: RobotConfig,
        actuators: Actuators,
        sensors: Arc<SensorManager>,
        targeting: impl TargetingInput + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        if let Some(missing) = MotorId::ALL.into_iter().find(|&id| !actuators.contains(id)) {
            return Err(ControlError::MissingActuator(missing));
        }

        let pipeline = BallPipeline::new(config.indexer.pipeline_config(config.sensors.retention()));
        info!(
            required_ticks = pipeline.required_ticks(),
            target_velocity = config.shooter.target_velocity,
            loop_hz = config.control.loop_hz,
            sensor_services = sensors.service_count(),
            "robot initialized"
        );

        Ok(Self {
            shooter: ShooterCoordinator::new(config.shooter.clone()),
            intake: IntakeController::new(config.intake.clone()),
            climb: ClimbController::new(config.climb.clone()),
            pipeline,
            config,
            actuators,
            sensors,
            targeting: Box::new(targeting),
            clock,
            telemetry: TelemetryPublisher::new(),
            cursors: Cursors::default(),
            cycle: 0,
            starved: false,
        })
    }

    // ==================== 控制循环 ====================

    /// 一个控制周期（非阻塞）
    pub fn tick(&mut self) -> Arc<TelemetrySnapshot> {
        let now_us = self.clock.now_us();
        self.cycle += 1;

        let (edges, transitions) = self.collect_reports();
        self.check_starvation();

        self.intake.tick(&mut self.pipeline, &mut self.actuators);
        self.pipeline.tick(now_us, &edges, &mut self.actuators);

        let aim = self.targeting.horizontal_offset_deg().filter(|v| v.is_finite());
        self.shooter
            .tick(now_us, &mut self.pipeline, &mut self.actuators, aim);
        self.climb.tick(&transitions, &mut self.actuators);

        let snapshot = self.snapshot(now_us, aim);
        self.telemetry.publish(snapshot)
    }

    fn collect_reports(&mut self) -> (Vec<Report>, Vec<Report>) {
        let mut edges = self
            .sensors
            .poll_new(ReportKind::Blocked, &mut self.cursors.blocked);
        edges.extend(
            self.sensors
                .poll_new(ReportKind::Cleared, &mut self.cursors.cleared),
        );
        edges.sort_by_key(|r| r.seq);

        let transitions = self
            .sensors
            .poll_new(ReportKind::Transition, &mut self.cursors.transition);
        if !edges.is_empty() || !transitions.is_empty() {
            debug!(
                cycle = self.cycle,
                edges = edges.len(),
                transitions = transitions.len(),
                "sensor reports"
            );
        }
        (edges, transitions)
    }

    fn check_starvation(&mut self) {
        let starved = self.sensors.is_starved();
        if starved && !self.starved {
            let unhealthy: Vec<String> = self
                .sensors
                .health()
                .iter()
                .filter(|h| !h.is_healthy())
                .map(|h| format!("{}({:?})", h.id, h.status))
                .collect();
            warn!(services = ?unhealthy, "sensor starvation, relying on encoder completion");
        } else if !starved && self.starved {
            info!("sensor services healthy again");
        }
        self.starved = starved;
    }

    fn snapshot(&self, now_us: u64, aim: Option<f64>) -> TelemetrySnapshot {
        let metrics = self.sensors.metrics();
        let contact = self.climb.bar_contact();
        TelemetrySnapshot {
            timestamp_us: now_us,
            cycle: self.cycle,
            shooter: ShooterTelemetry {
                state: self.shooter.state().as_str(),
                armed: self.shooter.is_armed(),
                at_speed: self.shooter.at_speed(),
                measured_velocity: self.shooter.measured_velocity(),
                target_velocity: self.shooter.target_velocity(),
                shots_fired: self.shooter.shots_fired(),
                faulted: self.shooter.is_faulted(),
            },
            pipeline: PipelineTelemetry {
                status: self.pipeline.status().as_str(),
                balls: self
                    .pipeline
                    .balls()
                    .iter()
                    .map(|b| BallTelemetry {
                        id: b.id,
                        stage: b.stage.as_str(),
                    })
                    .collect(),
                top_occupied: self.pipeline.check_top(),
                loading: self.pipeline.is_loading(),
                accepting: self.pipeline.is_accepting(),
                pending_entries: self.pipeline.pending_entries(),
                balls_consumed: self.pipeline.balls_consumed(),
                balls_ejected: self.pipeline.balls_ejected(),
                entries_discarded: self.pipeline.entries_discarded(),
                sensor_inconsistent: self.pipeline.sensor_inconsistent(),
                faulted: self.pipeline.is_faulted(),
            },
            intake: IntakeTelemetry {
                active: self.intake.is_active(),
                faulted: self.intake.is_faulted(),
            },
            climb: ClimbTelemetry {
                state: self.climb.state().as_str(),
                position: self.climb.position(),
                bar_left: contact.left,
                bar_right: contact.right,
                faulted: self.climb.is_faulted(),
            },
            sensors: SensorTelemetry {
                starved: self.starved,
                services: self.sensors.service_count(),
                polls: metrics.polls,
                reports_dropped: metrics.reports_dropped,
                read_errors: metrics.read_errors,
                services_dead: metrics.services_dead,
            },
            faulted_actuators: self.actuators.faulted().into_iter().map(MotorId::as_str).collect(),
            aim_offset_deg: aim,
        }
    }

    // ==================== 操作员入口 ====================

    /// 装填发射（发射轮必须已在起转）
    pub fn request_shoot(&mut self) -> RequestOutcome {
        self.shooter.request_shoot()
    }

    pub fn request_spool(&mut self) -> RequestOutcome {
        self.shooter.request_spool()
    }

    pub fn request_cease_fire(&mut self) -> RequestOutcome {
        self.shooter.request_cease_fire()
    }

    /// 停止发射器并取消进行中的 shift
    pub fn request_stop(&mut self) -> RequestOutcome {
        let outcome = self.shooter.request_stop(&mut self.pipeline);
        if self.pipeline.is_shifting() {
            self.pipeline.request_stop();
            return RequestOutcome::Accepted;
        }
        outcome
    }

    pub fn request_intake(&mut self, active: bool) -> RequestOutcome {
        self.intake
            .set_active(active, &mut self.pipeline, &mut self.actuators)
    }

    /// 手动前移一格（顶部有球时拒绝）
    pub fn request_index(&mut self) -> RequestOutcome {
        match self.pipeline.request_shift_forward(false) {
            Ok(ticket) => {
                debug!(%ticket, "manual index requested");
                RequestOutcome::Accepted
            },
            Err(e) => {
                debug!(error = %e, "manual index rejected");
                RequestOutcome::Rejected
            },
        }
    }

    /// 把最靠前的球连续前移到顶部（顶部有球或管道为空时忽略）
    pub fn request_load_to_top(&mut self) -> RequestOutcome {
        match self.pipeline.request_load_to_top() {
            Ok(true) => RequestOutcome::Accepted,
            Ok(false) => RequestOutcome::Ignored,
            Err(e) => {
                debug!(error = %e, "load to top rejected");
                RequestOutcome::Rejected
            },
        }
    }

    /// 后退一格（卡球恢复）
    pub fn request_shift_back(&mut self) -> RequestOutcome {
        if self.shooter.state() == ShooterState::Shooting {
            warn!("shift back rejected while shooting");
            return RequestOutcome::Rejected;
        }
        match self.pipeline.request_shift_back() {
            Ok(ticket) => {
                info!(%ticket, "shift back requested");
                RequestOutcome::Accepted
            },
            Err(e) => {
                warn!(error = %e, "shift back rejected");
                RequestOutcome::Rejected
            },
        }
    }

    pub fn request_climb_extend(&mut self) -> RequestOutcome {
        self.climb.request_extend()
    }

    pub fn request_climb_lift(&mut self) -> RequestOutcome {
        self.climb.request_lift()
    }

    pub fn request_climb_lower(&mut self) -> RequestOutcome {
        self.climb.request_lower()
    }

    pub fn request_climb_stop(&mut self) -> RequestOutcome {
        self.climb.request_stop()
    }

    /// 清除执行器的粘滞故障（由操作员确认后调用）
    pub fn clear_fault(&mut self, id: MotorId) -> RequestOutcome {
        if !self.actuators.contains(id) || !self.actuators.is_faulted(id) {
            return RequestOutcome::Ignored;
        }
        self.actuators.clear_fault(id);
        RequestOutcome::Accepted
    }

    /// 停止所有电机并停止传感器服务
    ///
    /// 电机总是先停；传感器线程未能在超时内退出时返回 [`ControlError::Sensor`]。
    pub fn shutdown(&mut self) -> Result<(), ControlError> {
        self.intake
            .set_active(false, &mut self.pipeline, &mut self.actuators);
        self.pipeline.set_accepting(false);
        self.actuators.stop_all();
        self.sensors.shutdown()?;
        info!(
            cycles = self.cycle,
            shots = self.shooter.shots_fired(),
            balls = self.pipeline.ball_count(),
            "robot shut down"
        );
        Ok(())
    }

    // ==================== 查询 ====================

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &BallPipeline {
        &self.pipeline
    }

    pub fn shooter(&self) -> &ShooterCoordinator {
        &self.shooter
    }

    pub fn intake(&self) -> &IntakeController {
        &self.intake
    }

    pub fn climb(&self) -> &ClimbController {
        &self.climb
    }

    pub fn actuators(&self) -> &Actuators {
        &self.actuators
    }

    pub fn sensors(&self) -> &Arc<SensorManager> {
        &self.sensors
    }

    /// 遥测发布点（可克隆给仪表盘线程）
    pub fn telemetry(&self) -> TelemetryPublisher {
        self.telemetry.clone()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}
