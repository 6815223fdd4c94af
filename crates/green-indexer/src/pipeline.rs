//! 球管道状态机（Ball Pipeline）
//!
//! 管道维护机构内所有球的有序列表（头部靠近入口，尾部靠近发射器），
//! 并通过皮带 shift 操作整体推进它们。
//!
//! # 判定规则
//!
//! - **完成**：皮带编码器进入目标 ± `position_tolerance_ticks`（编码器是唯一权威信号）
//! - **佐证**：领头球进入带光电开关的位置时，应收到该开关的 `Blocked` 边沿；
//!   两种信号分歧超过一个保留窗口时，置位 `sensor_inconsistent` 并记录警告
//! - **原子性**：所有球的位置只在 shift 完成时一次性推进
//!
//! # 线程模型
//!
//! `BallPipeline` 不是线程安全的，必须由控制循环线程独占。所有方法都不阻塞，
//! "等待到位"表达为跨多个 `tick()` 的轮询。

use crate::error::PipelineError;
use crate::geometry::BeltGeometry;
use crate::shift::{ShiftDirection, ShiftOperation, ShiftOutcome, ShiftTicket};
use crate::stage::{Ball, Stage};
use green_hal::{Actuators, ControlMode, HalError, MotorId, SensorId};
use green_sensors::{Report, ReportKind};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 保留的最近 shift 结果数量
const OUTCOME_HISTORY: usize = 32;

const BELT: MotorId = MotorId::IndexerBelt;

/// 管道配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub geometry: BeltGeometry,
    /// 到位判定容差（ticks，必须大于 0）
    pub position_tolerance_ticks: f64,
    /// shift 超时
    pub shift_timeout: Duration,
    /// 光电与编码器允许的最大分歧时间（通常等于报告保留窗口）
    pub corroboration_window: Duration,
    /// 空闲时自动把入口的球向上推
    pub auto_index: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            geometry: BeltGeometry::default(),
            position_tolerance_ticks: 40.0,
            shift_timeout: Duration::from_millis(1500),
            corroboration_window: Duration::from_millis(200),
            auto_index: true,
        }
    }
}

/// `tick()` 返回的管道状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineStatus {
    Idle,
    Shifting { direction: ShiftDirection, progress: f64 },
    /// 皮带故障，冻结一切推进
    Faulted,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::Shifting { .. } => "shifting",
            PipelineStatus::Faulted => "faulted",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Shift {
        ticket: ShiftTicket,
        direction: ShiftDirection,
        override_top: bool,
    },
    Stop,
}

/// 连续前移到顶部的进度
#[derive(Debug, Clone, Copy, Default)]
struct LoadToTop {
    /// 当前这一步
    step: Option<ShiftTicket>,
    steps: u32,
}

/// 球管道状态机
pub struct BallPipeline {
    config: PipelineConfig,
    required_ticks: f64,
    /// 按位置升序（头部 = 入口）
    balls: Vec<Ball>,
    next_ball_id: u64,
    next_ticket: u64,
    commands: VecDeque<Command>,
    in_flight: Option<ShiftOperation>,
    loading: Option<LoadToTop>,
    outcomes: VecDeque<(ShiftTicket, ShiftOutcome)>,
    accepting: bool,
    /// 入口被占用时暂存的入口边沿
    held_entries: u32,
    balls_created: u64,
    balls_consumed: u64,
    balls_ejected: u64,
    entries_discarded: u64,
    last_position: f64,
    /// 编码器已完成、仍在等待佐证边沿：(传感器, 截止时间)
    awaiting_edge: Option<(SensorId, u64)>,
    sensor_inconsistent: bool,
    faulted: bool,
    status: PipelineStatus,
}

impl BallPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            required_ticks: config.geometry.required_ticks(),
            config,
            balls: Vec::with_capacity(Stage::ALL.len()),
            next_ball_id: 1,
            next_ticket: 1,
            commands: VecDeque::new(),
            in_flight: None,
            loading: None,
            outcomes: VecDeque::with_capacity(OUTCOME_HISTORY),
            accepting: false,
            held_entries: 0,
            balls_created: 0,
            balls_consumed: 0,
            balls_ejected: 0,
            entries_discarded: 0,
            last_position: 0.0,
            awaiting_edge: None,
            sensor_inconsistent: false,
            faulted: false,
            status: PipelineStatus::Idle,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 一次 shift 的皮带位移（ticks）
    pub fn required_ticks(&self) -> f64 {
        self.required_ticks
    }

    // ==================== 请求入口 ====================

    /// 请求前移一格
    ///
    /// 顶部有球时拒绝，除非 `override_top`（发射器刚消耗顶部球时使用）。
    /// 命令在下一次 `tick()` 生效，并取代进行中的 shift。
    pub fn request_shift_forward(&mut self, override_top: bool) -> Result<ShiftTicket, PipelineError> {
        if self.faulted {
            return Err(PipelineError::BeltFaulted(HalError::Unavailable(BELT)));
        }
        if !override_top && self.check_top() {
            debug!("shift forward refused: top slot occupied");
            return Err(PipelineError::TopOccupied);
        }
        Ok(self.enqueue_shift(ShiftDirection::Forward, override_top))
    }

    /// 请求后退一格（入口处的球会被退出）
    pub fn request_shift_back(&mut self) -> Result<ShiftTicket, PipelineError> {
        if self.faulted {
            return Err(PipelineError::BeltFaulted(HalError::Unavailable(BELT)));
        }
        self.loading = None;
        Ok(self.enqueue_shift(ShiftDirection::Back, false))
    }

    /// 把最靠前的球逐格前移到顶部
    ///
    /// 返回 `Ok(false)` 表示无需移动（管道为空或顶部已有球）。
    /// 每一步都是完整的一格 shift，途中的取消/中止会结束整个装填。
    pub fn request_load_to_top(&mut self) -> Result<bool, PipelineError> {
        if self.faulted {
            return Err(PipelineError::BeltFaulted(HalError::Unavailable(BELT)));
        }
        if self.check_top() || self.balls.is_empty() {
            return Ok(false);
        }
        if self.ball_at(Stage::Shooting).is_some() {
            debug!("load to top refused: ball still at shooter");
            return Err(PipelineError::ShooterOccupied);
        }
        if self.loading.is_none() {
            info!(balls = self.balls.len(), "load to top requested");
            self.loading = Some(LoadToTop::default());
        }
        Ok(true)
    }

    /// 停止皮带，取消进行中的 shift（不推进任何球）
    pub fn request_stop(&mut self) {
        self.loading = None;
        self.commands.push_back(Command::Stop);
    }

    /// 是否接收入口的新球（随进球机构开关）
    pub fn set_accepting(&mut self, accepting: bool) {
        if self.accepting != accepting {
            debug!(accepting, "pipeline acceptance changed");
        }
        self.accepting = accepting;
    }

    /// 发射出口的超时兜底：直接移除 `Shooting` 位置的球
    pub fn confirm_shot_exit(&mut self) -> bool {
        match self.remove_at(Stage::Shooting) {
            Some(ball) => {
                self.balls_consumed += 1;
                info!(ball = ball.id, "shot exit confirmed without sensor");
                true
            },
            None => false,
        }
    }

    // ==================== 查询 ====================

    pub fn balls(&self) -> &[Ball] {
        &self.balls
    }

    pub fn ball_at(&self, stage: Stage) -> Option<&Ball> {
        self.balls.iter().find(|b| b.stage == stage)
    }

    /// 顶部槽位是否有球
    pub fn check_top(&self) -> bool {
        self.ball_at(Stage::Top).is_some()
    }

    pub fn ball_count(&self) -> usize {
        self.balls.len()
    }

    pub fn balls_created(&self) -> u64 {
        self.balls_created
    }

    pub fn balls_consumed(&self) -> u64 {
        self.balls_consumed
    }

    pub fn balls_ejected(&self) -> u64 {
        self.balls_ejected
    }

    /// 因 shift 被取消而丢弃的入口边沿
    pub fn entries_discarded(&self) -> u64 {
        self.entries_discarded
    }

    /// 尚未生成球的入口边沿
    pub fn pending_entries(&self) -> u32 {
        self.held_entries + self.in_flight.as_ref().map_or(0, |op| op.entries_during)
    }

    pub fn is_shifting(&self) -> bool {
        self.in_flight.is_some()
            || self
                .commands
                .iter()
                .any(|c| matches!(c, Command::Shift { .. }))
    }

    pub fn in_flight(&self) -> Option<&ShiftOperation> {
        self.in_flight.as_ref()
    }

    /// 是否正在连续前移到顶部
    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn sensor_inconsistent(&self) -> bool {
        self.sensor_inconsistent
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// shift 请求的结果；仍在排队或执行中时返回 `None`
    pub fn outcome(&self, ticket: ShiftTicket) -> Option<ShiftOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(t, _)| *t == ticket)
            .map(|(_, outcome)| outcome.clone())
    }

    // ==================== 控制循环 ====================

    /// 推进状态机一个控制周期（非阻塞）
    ///
    /// `reports` 是自上次 tick 以来的新报告，每条只应传入一次。
    pub fn tick(&mut self, now_us: u64, reports: &[Report], actuators: &mut Actuators) -> PipelineStatus {
        for report in reports {
            self.handle_report(report);
        }

        if actuators.is_faulted(BELT) {
            let fault = actuators
                .fault(BELT)
                .cloned()
                .unwrap_or(HalError::UnknownMotor(BELT));
            self.freeze(fault, actuators);
            self.status = PipelineStatus::Faulted;
            return self.status;
        }
        if self.faulted {
            info!("indexer belt fault cleared, pipeline resumed");
            self.faulted = false;
        }

        let started_now = self.apply_commands(now_us, actuators);
        if !started_now {
            self.poll_in_flight(now_us, actuators);
        }
        self.check_awaiting_edge(now_us);
        self.advance_loading(now_us, actuators);
        self.auto_index(now_us, actuators);

        self.status = match (&self.in_flight, self.faulted) {
            (_, true) => PipelineStatus::Faulted,
            (Some(op), false) => PipelineStatus::Shifting {
                direction: op.direction,
                progress: op.progress(self.last_position),
            },
            (None, false) => PipelineStatus::Idle,
        };
        self.status
    }

    fn handle_report(&mut self, report: &Report) {
        match (report.kind, report.sensor) {
            (ReportKind::Blocked, SensorId::IntakeEntry) => self.on_entry(),
            (ReportKind::Cleared, SensorId::ShooterExit) => self.on_exit(),
            (ReportKind::Blocked, sensor) => self.on_corroborating_edge(sensor, report.timestamp_us),
            _ => {},
        }
    }

    fn on_entry(&mut self) {
        if !self.accepting {
            debug!("entry edge ignored: pipeline not accepting");
            return;
        }
        if let Some(op) = self.in_flight.as_mut() {
            op.entries_during += 1;
            trace!(ticket = %op.ticket, "entry edge held until shift completes");
        } else if self.ball_at(Stage::Entering).is_none() {
            self.create_ball();
        } else {
            self.held_entries += 1;
            debug!(held = self.held_entries, "entry slot occupied, holding entry");
        }
    }

    fn on_exit(&mut self) {
        if let Some(ball) = self.remove_at(Stage::Shooting) {
            self.balls_consumed += 1;
            info!(ball = ball.id, consumed = self.balls_consumed, "ball left shooter");
            return;
        }
        let shooting_top = self.ball_at(Stage::Top).is_some();
        match self.in_flight.as_mut() {
            Some(op) if op.direction == ShiftDirection::Forward && shooting_top => {
                op.exit_seen = true;
            },
            _ => debug!("exit edge with no ball at shooter"),
        }
    }

    fn on_corroborating_edge(&mut self, sensor: SensorId, timestamp_us: u64) {
        if let Some(op) = self.in_flight.as_mut()
            && op.expected_sensor == Some(sensor)
            && timestamp_us >= op.started_us
            && op.sensor_seen_us.is_none()
        {
            op.sensor_seen_us = Some(timestamp_us);
            trace!(ticket = %op.ticket, %sensor, "shift corroborated by sensor");
            return;
        }
        if let Some((expected, _)) = self.awaiting_edge
            && expected == sensor
        {
            self.awaiting_edge = None;
            trace!(%sensor, "late corroboration within window");
        }
    }

    /// 应用排队命令，返回本周期是否启动了新的 shift
    fn apply_commands(&mut self, now_us: u64, actuators: &mut Actuators) -> bool {
        let commands: Vec<Command> = self.commands.drain(..).collect();
        let last = commands.len().saturating_sub(1);
        let mut started = false;

        for (i, command) in commands.into_iter().enumerate() {
            match command {
                Command::Stop => {
                    self.cancel_in_flight(actuators);
                    actuators.stop(BELT);
                    started = false;
                },
                Command::Shift { ticket, .. } if i < last => {
                    debug!(%ticket, "shift superseded before start");
                    self.record(ticket, ShiftOutcome::Cancelled);
                },
                Command::Shift {
                    ticket,
                    direction,
                    override_top,
                } => {
                    self.cancel_in_flight(actuators);
                    started = self.start_shift(ticket, direction, override_top, now_us, actuators);
                },
            }
        }
        started
    }

    fn start_shift(
        &mut self,
        ticket: ShiftTicket,
        direction: ShiftDirection,
        override_top: bool,
        now_us: u64,
        actuators: &mut Actuators,
    ) -> bool {
        if direction == ShiftDirection::Forward && !override_top && self.check_top() {
            debug!(%ticket, "shift forward refused at start: top slot occupied");
            self.record(ticket, ShiftOutcome::Aborted(PipelineError::TopOccupied));
            return false;
        }

        let start = match actuators.position(BELT) {
            Ok(position) => position,
            Err(e) => {
                self.record(ticket, ShiftOutcome::Aborted(PipelineError::BeltFaulted(e.clone())));
                self.freeze(e, actuators);
                return false;
            },
        };
        self.last_position = start;

        let expected_sensor = match direction {
            ShiftDirection::Forward => self
                .balls
                .last()
                .and_then(|lead| lead.stage.next())
                .and_then(Stage::expected_sensor),
            ShiftDirection::Back => None,
        };
        let op = ShiftOperation::new(ticket, direction, start, self.required_ticks, now_us, expected_sensor);

        if let Err(e) = actuators.set(BELT, ControlMode::MotionMagic, op.target_ticks) {
            self.record(ticket, ShiftOutcome::Aborted(PipelineError::BeltFaulted(e.clone())));
            self.freeze(e, actuators);
            return false;
        }
        info!(
            %ticket,
            direction = direction.as_str(),
            start,
            target = op.target_ticks,
            balls = self.balls.len(),
            "shift started"
        );
        self.in_flight = Some(op);
        true
    }

    fn poll_in_flight(&mut self, now_us: u64, actuators: &mut Actuators) {
        let Some(op) = self.in_flight.as_ref() else {
            return;
        };

        let position = match actuators.position(BELT) {
            Ok(position) => position,
            Err(e) => {
                debug!(ticket = %op.ticket, "belt position unavailable, aborting shift");
                self.freeze(e, actuators);
                return;
            },
        };
        self.last_position = position;

        if op.is_complete(position, self.config.position_tolerance_ticks) {
            if let Some(op) = self.in_flight.take() {
                self.commit(op, position, now_us);
            }
            return;
        }

        let elapsed = Duration::from_micros(now_us.saturating_sub(op.started_us));
        if elapsed > self.config.shift_timeout {
            let err = PipelineError::ShiftTimeout {
                timeout: self.config.shift_timeout,
                remaining_ticks: op.remaining(position),
            };
            warn!(ticket = %op.ticket, error = %err, "shift stalled");
            self.abort_in_flight(err, actuators);
            return;
        }

        let window = self.config.corroboration_window;
        if let Some(op) = self.in_flight.as_mut()
            && let Some(seen_us) = op.sensor_seen_us
            && !op.inconsistency_reported
            && Duration::from_micros(now_us.saturating_sub(seen_us)) > window
        {
            op.inconsistency_reported = true;
            self.sensor_inconsistent = true;
            warn!(
                ticket = %op.ticket,
                sensor = ?op.expected_sensor,
                remaining = op.remaining(position),
                "sensor reported arrival but encoder has not completed; trusting encoder"
            );
        }
    }

    fn commit(&mut self, op: ShiftOperation, position: f64, now_us: u64) {
        let mut removed = 0u64;
        match op.direction {
            ShiftDirection::Forward => {
                self.balls.retain_mut(|ball| match ball.stage.next() {
                    Some(stage) => {
                        ball.stage = stage;
                        ball.entry_tick_position = position;
                        true
                    },
                    None => {
                        removed += 1;
                        false
                    },
                });
                self.balls_consumed += removed;
                if op.exit_seen && let Some(ball) = self.remove_at(Stage::Shooting) {
                    self.balls_consumed += 1;
                    info!(ball = ball.id, "ball left shooter during shift");
                }
            },
            ShiftDirection::Back => {
                self.balls.retain_mut(|ball| match ball.stage.prev() {
                    Some(stage) => {
                        ball.stage = stage;
                        ball.entry_tick_position = position;
                        true
                    },
                    None => {
                        removed += 1;
                        false
                    },
                });
                self.balls_ejected += removed;
            },
        }

        if let Some(sensor) = op.expected_sensor {
            if op.sensor_seen_us.is_some() {
                self.sensor_inconsistent = false;
            } else {
                let deadline = now_us + self.config.corroboration_window.as_micros() as u64;
                self.awaiting_edge = Some((sensor, deadline));
            }
        }

        self.held_entries += op.entries_during;
        if self.held_entries > 0 && self.ball_at(Stage::Entering).is_none() {
            self.held_entries -= 1;
            self.create_ball();
        }

        info!(
            ticket = %op.ticket,
            direction = op.direction.as_str(),
            position,
            balls = self.balls.len(),
            removed,
            "shift committed"
        );
        self.record(op.ticket, ShiftOutcome::Committed);
    }

    fn check_awaiting_edge(&mut self, now_us: u64) {
        if let Some((sensor, deadline)) = self.awaiting_edge
            && now_us > deadline
        {
            self.awaiting_edge = None;
            self.sensor_inconsistent = true;
            warn!(%sensor, "encoder completed shift but sensor never confirmed; trusting encoder");
        }
    }

    fn advance_loading(&mut self, now_us: u64, actuators: &mut Actuators) {
        let Some(mut load) = self.loading else {
            return;
        };
        if let Some(ticket) = load.step {
            match self.outcome(ticket) {
                None => return,
                Some(ShiftOutcome::Committed) => load.step = None,
                Some(outcome) => {
                    warn!(%ticket, ?outcome, steps = load.steps, "load to top interrupted");
                    self.loading = None;
                    return;
                },
            }
        }

        if self.check_top() {
            info!(steps = load.steps, "ball loaded to top");
            self.loading = None;
            return;
        }
        if self.balls.is_empty() || self.ball_at(Stage::Shooting).is_some() {
            debug!(steps = load.steps, "load to top ended without a ball at top");
            self.loading = None;
            return;
        }
        if self.in_flight.is_some() || !self.commands.is_empty() {
            self.loading = Some(load);
            return;
        }

        let ticket = self.next_ticket();
        if self.start_shift(ticket, ShiftDirection::Forward, false, now_us, actuators) {
            load.step = Some(ticket);
            load.steps += 1;
            self.loading = Some(load);
        } else {
            self.loading = None;
        }
    }

    fn auto_index(&mut self, now_us: u64, actuators: &mut Actuators) {
        if !self.config.auto_index
            || !self.accepting
            || self.faulted
            || self.in_flight.is_some()
            || !self.commands.is_empty()
            || self.ball_at(Stage::Entering).is_none()
            || self.ball_at(Stage::Shooting).is_some()
            || self.check_top()
        {
            return;
        }
        let ticket = self.next_ticket();
        debug!(%ticket, "auto-index");
        self.start_shift(ticket, ShiftDirection::Forward, false, now_us, actuators);
    }

    /// 执行器故障：中止一切并冻结
    fn freeze(&mut self, fault: HalError, actuators: &mut Actuators) {
        if !self.faulted {
            error!(error = %fault, balls = self.balls.len(), "indexer belt faulted, pipeline frozen");
            self.faulted = true;
        }
        self.loading = None;
        if self.in_flight.is_some() {
            self.abort_in_flight(PipelineError::BeltFaulted(fault.clone()), actuators);
        }
        for command in std::mem::take(&mut self.commands) {
            if let Command::Shift { ticket, .. } = command {
                self.record(ticket, ShiftOutcome::Aborted(PipelineError::BeltFaulted(fault.clone())));
            }
        }
    }

    fn cancel_in_flight(&mut self, actuators: &mut Actuators) {
        if let Some(op) = self.in_flight.take() {
            actuators.stop(BELT);
            self.discard_entries(&op);
            info!(ticket = %op.ticket, "shift cancelled, no advance");
            self.record(op.ticket, ShiftOutcome::Cancelled);
        }
    }

    fn abort_in_flight(&mut self, err: PipelineError, actuators: &mut Actuators) {
        if let Some(op) = self.in_flight.take() {
            actuators.stop(BELT);
            self.discard_entries(&op);
            self.record(op.ticket, ShiftOutcome::Aborted(err));
        }
    }

    fn discard_entries(&mut self, op: &ShiftOperation) {
        if op.entries_during > 0 {
            warn!(
                ticket = %op.ticket,
                entries = op.entries_during,
                "discarding entry edges recorded during interrupted shift"
            );
            self.entries_discarded += op.entries_during as u64;
        }
    }

    fn create_ball(&mut self) {
        let ball = Ball {
            id: self.next_ball_id,
            stage: Stage::Entering,
            entry_tick_position: self.last_position,
        };
        self.next_ball_id += 1;
        self.balls_created += 1;
        // Entering 是最低位置，插到头部保持有序
        self.balls.insert(0, ball);
        info!(ball = ball.id, count = self.balls.len(), "ball entered");
    }

    fn remove_at(&mut self, stage: Stage) -> Option<Ball> {
        let index = self.balls.iter().position(|b| b.stage == stage)?;
        Some(self.balls.remove(index))
    }

    fn enqueue_shift(&mut self, direction: ShiftDirection, override_top: bool) -> ShiftTicket {
        let ticket = self.next_ticket();
        self.commands.push_back(Command::Shift {
            ticket,
            direction,
            override_top,
        });
        ticket
    }

    fn next_ticket(&mut self) -> ShiftTicket {
        let ticket = ShiftTicket(self.next_ticket);
        self.next_ticket += 1;
        ticket
    }

    fn record(&mut self, ticket: ShiftTicket, outcome: ShiftOutcome) {
        if self.outcomes.len() == OUTCOME_HISTORY {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back((ticket, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use green_hal::mock::{MockMotor, MockMotorHandle};

    fn setup(config: PipelineConfig) -> (BallPipeline, Actuators, MockMotorHandle) {
        let (belt, handle) = MockMotor::new();
        let actuators = Actuators::new().with_motor(BELT, belt);
        (BallPipeline::new(config), actuators, handle)
    }

    fn manual() -> PipelineConfig {
        PipelineConfig {
            auto_index: false,
            ..PipelineConfig::default()
        }
    }

    fn edge(kind: ReportKind, sensor: SensorId, ts: u64) -> Report {
        let (previous, current) = match kind {
            ReportKind::Cleared => (true, false),
            _ => (false, true),
        };
        kind.build(sensor, previous, current, ts).unwrap()
    }

    fn entry(ts: u64) -> Report {
        edge(ReportKind::Blocked, SensorId::IntakeEntry, ts)
    }

    fn stages(p: &BallPipeline) -> Vec<Stage> {
        p.balls().iter().map(|b| b.stage).collect()
    }

    #[test]
    fn test_entry_ignored_when_not_accepting() {
        let (mut p, mut act, _) = setup(manual());
        p.tick(0, &[entry(0)], &mut act);
        assert_eq!(p.ball_count(), 0);

        p.set_accepting(true);
        p.tick(1_000, &[entry(1_000)], &mut act);
        assert_eq!(stages(&p), vec![Stage::Entering]);
        assert_eq!(p.balls()[0].id, 1);
    }

    #[test]
    fn test_shift_forward_commits_after_encoder_reaches_target() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(4_000.0));
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        let ticket = p.request_shift_forward(false).unwrap();
        assert!(p.is_shifting());
        assert_eq!(p.outcome(ticket), None);

        // 启动：读位置 + 下发 MotionMagic
        let status = p.tick(20_000, &[], &mut act);
        assert!(matches!(status, PipelineStatus::Shifting { .. }));
        assert_eq!(stages(&p), vec![Stage::Entering]);

        // 4000 / 6844：还没到
        p.tick(40_000, &[], &mut act);
        assert_eq!(stages(&p), vec![Stage::Entering]);
        assert_eq!(p.outcome(ticket), None);

        p.tick(60_000, &[], &mut act);
        assert_eq!(stages(&p), vec![Stage::BottomCorner]);
        assert_eq!(p.outcome(ticket), Some(ShiftOutcome::Committed));
        assert_eq!(p.status(), PipelineStatus::Idle);
        assert!((p.balls()[0].entry_tick_position - p.required_ticks()).abs() < 1e-6);
    }

    #[test]
    fn test_stop_cancels_without_advance() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(1_000.0));
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        let ticket = p.request_shift_forward(false).unwrap();
        p.tick(20_000, &[], &mut act);
        p.tick(40_000, &[], &mut act);

        p.request_stop();
        p.tick(60_000, &[], &mut act);
        assert_eq!(p.outcome(ticket), Some(ShiftOutcome::Cancelled));
        assert_eq!(stages(&p), vec![Stage::Entering]);
        assert_eq!(belt.last_command(), Some((ControlMode::PercentOutput, 0.0)));
        assert!(!p.is_shifting());
    }

    #[test]
    fn test_new_request_preempts_in_flight_shift() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(1_000.0));

        let first = p.request_shift_forward(false).unwrap();
        p.tick(0, &[], &mut act);
        let second = p.request_shift_back().unwrap();
        p.tick(20_000, &[], &mut act);

        assert_eq!(p.outcome(first), Some(ShiftOutcome::Cancelled));
        assert_eq!(p.outcome(second), None);
        assert_eq!(p.in_flight().map(|op| op.direction), Some(ShiftDirection::Back));
    }

    #[test]
    fn test_superseded_queued_requests_never_start() {
        let (mut p, mut act, belt) = setup(manual());
        let a = p.request_shift_forward(false).unwrap();
        let b = p.request_shift_forward(false).unwrap();
        p.tick(0, &[], &mut act);

        assert_eq!(p.outcome(a), Some(ShiftOutcome::Cancelled));
        assert_eq!(belt.position_command_count(), 1);
        p.tick(20_000, &[], &mut act);
        assert_eq!(p.outcome(b), Some(ShiftOutcome::Committed));
    }

    #[test]
    fn test_top_occupied_refuses_without_override() {
        let (mut p, mut act, _) = setup(manual());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);
        for i in 0..5 {
            p.request_shift_forward(false).unwrap();
            p.tick(i * 40_000 + 20_000, &[], &mut act);
            p.tick(i * 40_000 + 40_000, &[], &mut act);
        }
        assert!(p.check_top());

        assert_eq!(p.request_shift_forward(false), Err(PipelineError::TopOccupied));
        assert!(!p.is_shifting());

        let ticket = p.request_shift_forward(true).unwrap();
        p.tick(1_000_000, &[], &mut act);
        p.tick(1_020_000, &[], &mut act);
        assert_eq!(p.outcome(ticket), Some(ShiftOutcome::Committed));
        assert_eq!(stages(&p), vec![Stage::Shooting]);
    }

    #[test]
    fn test_timeout_aborts_shift() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(10.0));
        p.set_accepting(true);

        let ticket = p.request_shift_forward(false).unwrap();
        p.tick(0, &[], &mut act);
        p.tick(20_000, &[entry(20_000)], &mut act);
        p.tick(1_600_000, &[], &mut act);

        assert!(matches!(
            p.outcome(ticket),
            Some(ShiftOutcome::Aborted(PipelineError::ShiftTimeout { .. }))
        ));
        assert_eq!(belt.last_command(), Some((ControlMode::PercentOutput, 0.0)));
        // 中止的 shift 期间记录的入口边沿被丢弃
        assert_eq!(p.ball_count(), 0);
        assert_eq!(p.entries_discarded(), 1);
    }

    #[test]
    fn test_belt_fault_freezes_pipeline() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(1_000.0));
        let ticket = p.request_shift_forward(false).unwrap();
        p.tick(0, &[], &mut act);

        belt.fail_next(HalError::Fault("overcurrent".into()));
        assert_eq!(p.tick(20_000, &[], &mut act), PipelineStatus::Faulted);
        assert!(matches!(
            p.outcome(ticket),
            Some(ShiftOutcome::Aborted(PipelineError::BeltFaulted(_)))
        ));

        assert_eq!(p.tick(40_000, &[], &mut act), PipelineStatus::Faulted);
        assert!(matches!(
            p.request_shift_forward(false),
            Err(PipelineError::BeltFaulted(_))
        ));

        act.clear_fault(BELT);
        assert_eq!(p.tick(60_000, &[], &mut act), PipelineStatus::Idle);
        assert!(p.request_shift_forward(false).is_ok());
    }

    #[test]
    fn test_exit_edge_consumes_shooting_ball() {
        let (mut p, mut act, _) = setup(manual());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);
        for i in 0..6 {
            p.request_shift_forward(true).unwrap();
            p.tick(i * 40_000 + 20_000, &[], &mut act);
            p.tick(i * 40_000 + 40_000, &[], &mut act);
        }
        assert_eq!(stages(&p), vec![Stage::Shooting]);

        p.tick(300_000, &[edge(ReportKind::Cleared, SensorId::ShooterExit, 300_000)], &mut act);
        assert_eq!(p.ball_count(), 0);
        assert_eq!(p.balls_consumed(), 1);
        assert!(!p.confirm_shot_exit());
    }

    #[test]
    fn test_auto_index_pushes_entering_ball() {
        let (mut p, mut act, belt) = setup(PipelineConfig::default());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);
        assert!(p.in_flight().is_some());
        assert_eq!(belt.position_command_count(), 1);

        p.tick(20_000, &[], &mut act);
        assert_eq!(stages(&p), vec![Stage::BottomCorner]);
        // 入口空了，不再自动推进
        p.tick(40_000, &[], &mut act);
        assert_eq!(belt.position_command_count(), 1);
    }

    #[test]
    fn test_missing_corroboration_raises_flag() {
        let (mut p, mut act, _) = setup(manual());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        // Entering → BottomCorner 应触发 HorizontalCorner
        p.request_shift_forward(false).unwrap();
        p.tick(10_000, &[], &mut act);
        p.tick(30_000, &[], &mut act);
        assert!(!p.sensor_inconsistent());

        p.tick(250_000, &[], &mut act);
        assert!(p.sensor_inconsistent());
    }

    #[test]
    fn test_corroborated_shift_keeps_flag_clear() {
        let (mut p, mut act, _) = setup(manual());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        p.request_shift_forward(false).unwrap();
        p.tick(10_000, &[], &mut act);
        let corner = edge(ReportKind::Blocked, SensorId::HorizontalCorner, 15_000);
        p.tick(30_000, &[corner], &mut act);
        p.tick(500_000, &[], &mut act);
        assert!(!p.sensor_inconsistent());
    }

    #[test]
    fn test_sensor_without_encoder_completion_is_flagged() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(100.0));
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        p.request_shift_forward(false).unwrap();
        p.tick(10_000, &[], &mut act);
        let corner = edge(ReportKind::Blocked, SensorId::HorizontalCorner, 20_000);
        p.tick(20_000, &[corner], &mut act);
        p.tick(200_000, &[], &mut act);
        assert!(!p.sensor_inconsistent());
        p.tick(230_000, &[], &mut act);
        assert!(p.sensor_inconsistent());
        // 编码器仍然是权威：球没有推进
        assert_eq!(stages(&p), vec![Stage::Entering]);
    }

    #[test]
    fn test_entries_during_shift_materialize_after_commit() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(5_000.0));
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        p.request_shift_forward(false).unwrap();
        p.tick(10_000, &[], &mut act);
        p.tick(20_000, &[entry(20_000)], &mut act);
        assert_eq!(p.pending_entries(), 1);
        p.tick(30_000, &[], &mut act);

        assert_eq!(stages(&p), vec![Stage::Entering, Stage::BottomCorner]);
        assert_eq!(p.pending_entries(), 0);
        assert_eq!(p.balls_created(), 2);
    }

    #[test]
    fn test_shift_back_ejects_entering_ball() {
        let (mut p, mut act, _) = setup(manual());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);

        p.request_shift_back().unwrap();
        p.tick(10_000, &[], &mut act);
        p.tick(20_000, &[], &mut act);
        assert_eq!(p.ball_count(), 0);
        assert_eq!(p.balls_ejected(), 1);
    }

    #[test]
    fn test_load_to_top_steps_single_ball() {
        let (mut p, mut act, belt) = setup(manual());
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);
        assert_eq!(p.request_load_to_top(), Ok(true));
        assert!(p.is_loading());

        let mut now = 0;
        while p.is_loading() {
            now += 20_000;
            p.tick(now, &[], &mut act);
            assert!(now < 1_000_000, "load to top never finished");
        }
        assert_eq!(stages(&p), vec![Stage::Top]);
        assert_eq!(belt.position_command_count(), 5);

        // 顶部已有球，无需移动
        assert_eq!(p.request_load_to_top(), Ok(false));
        p.tick(now + 20_000, &[], &mut act);
        assert_eq!(belt.position_command_count(), 5);
    }

    #[test]
    fn test_stop_ends_load_to_top() {
        let (mut p, mut act, belt) = setup(manual());
        belt.set_travel_per_read(Some(1_000.0));
        p.set_accepting(true);
        p.tick(0, &[entry(0)], &mut act);
        p.request_load_to_top().unwrap();
        p.tick(20_000, &[], &mut act);
        assert!(p.is_shifting());

        p.request_stop();
        assert!(!p.is_loading());
        p.tick(40_000, &[], &mut act);
        assert!(!p.is_shifting());
        assert_eq!(stages(&p), vec![Stage::Entering]);
    }

    #[test]
    fn test_load_to_top_refused_with_ball_at_shooter() {
        let (mut p, mut act, _) = setup(manual());
        p.set_accepting(true);
        assert_eq!(p.request_load_to_top(), Ok(false));

        p.tick(0, &[entry(0)], &mut act);
        for i in 0..6 {
            p.request_shift_forward(true).unwrap();
            p.tick(i * 40_000 + 20_000, &[], &mut act);
            p.tick(i * 40_000 + 40_000, &[], &mut act);
        }
        assert_eq!(stages(&p), vec![Stage::Shooting]);
        assert_eq!(p.request_load_to_top(), Err(PipelineError::ShooterOccupied));
        assert!(!p.is_loading());
    }
}
