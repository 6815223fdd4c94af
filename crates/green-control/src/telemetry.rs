//! 遥测快照
//!
//! 控制循环每周期生成一个 [`TelemetrySnapshot`] 并发布到 [`TelemetryPublisher`]，
//! 仪表盘线程通过 `ArcSwap::load` 无锁读取最新快照。

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// 一个控制周期的完整状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp_us: u64,
    pub cycle: u64,
    pub shooter: ShooterTelemetry,
    pub pipeline: PipelineTelemetry,
    pub intake: IntakeTelemetry,
    pub climb: ClimbTelemetry,
    pub sensors: SensorTelemetry,
    /// 处于粘滞故障的执行器
    pub faulted_actuators: Vec<&'static str>,
    /// 本周期的目标水平偏角
    pub aim_offset_deg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShooterTelemetry {
    pub state: &'static str,
    pub armed: bool,
    pub at_speed: bool,
    pub measured_velocity: f64,
    pub target_velocity: f64,
    pub shots_fired: u64,
    pub faulted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BallTelemetry {
    pub id: u64,
    pub stage: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineTelemetry {
    pub status: &'static str,
    /// 从入口到发射器
    pub balls: Vec<BallTelemetry>,
    pub top_occupied: bool,
    /// 正在连续前移到顶部
    pub loading: bool,
    pub accepting: bool,
    pub pending_entries: u32,
    pub balls_consumed: u64,
    pub balls_ejected: u64,
    pub entries_discarded: u64,
    pub sensor_inconsistent: bool,
    pub faulted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntakeTelemetry {
    pub active: bool,
    pub faulted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClimbTelemetry {
    pub state: &'static str,
    pub position: f64,
    pub bar_left: bool,
    pub bar_right: bool,
    pub faulted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorTelemetry {
    /// 有运行中的服务超过饥饿超时没有完成轮询
    pub starved: bool,
    pub services: usize,
    pub polls: u64,
    pub reports_dropped: u64,
    pub read_errors: u64,
    pub services_dead: u64,
}

/// 标量遥测值
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Bool(v) => write!(f, "{}", v),
            TelemetryValue::Int(v) => write!(f, "{}", v),
            TelemetryValue::Float(v) => write!(f, "{:.1}", v),
            TelemetryValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Bool(v)
    }
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Int(v as i64)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Float(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

impl TelemetrySnapshot {
    /// 展平为键值对（网络表等外部接收端使用）
    pub fn entries(&self) -> Vec<(&'static str, TelemetryValue)> {
        let stages = self
            .pipeline
            .balls
            .iter()
            .map(|b| b.stage)
            .collect::<Vec<_>>()
            .join(",");

        vec![
            ("cycle", self.cycle.into()),
            ("shooter/state", self.shooter.state.into()),
            ("shooter/armed", self.shooter.armed.into()),
            ("shooter/at_speed", self.shooter.at_speed.into()),
            ("shooter/velocity", self.shooter.measured_velocity.into()),
            ("shooter/target_velocity", self.shooter.target_velocity.into()),
            ("shooter/shots_fired", self.shooter.shots_fired.into()),
            ("shooter/faulted", self.shooter.faulted.into()),
            ("pipeline/status", self.pipeline.status.into()),
            ("pipeline/ball_count", (self.pipeline.balls.len() as u64).into()),
            ("pipeline/stages", stages.as_str().into()),
            ("pipeline/top_occupied", self.pipeline.top_occupied.into()),
            ("pipeline/loading", self.pipeline.loading.into()),
            ("pipeline/accepting", self.pipeline.accepting.into()),
            ("pipeline/pending_entries", u64::from(self.pipeline.pending_entries).into()),
            ("pipeline/balls_consumed", self.pipeline.balls_consumed.into()),
            ("pipeline/balls_ejected", self.pipeline.balls_ejected.into()),
            ("pipeline/sensor_inconsistent", self.pipeline.sensor_inconsistent.into()),
            ("pipeline/faulted", self.pipeline.faulted.into()),
            ("intake/active", self.intake.active.into()),
            ("intake/faulted", self.intake.faulted.into()),
            ("climb/state", self.climb.state.into()),
            ("climb/position", self.climb.position.into()),
            ("climb/bar_left", self.climb.bar_left.into()),
            ("climb/bar_right", self.climb.bar_right.into()),
            ("climb/faulted", self.climb.faulted.into()),
            ("sensors/starved", self.sensors.starved.into()),
            ("sensors/services", (self.sensors.services as u64).into()),
            ("sensors/reports_dropped", self.sensors.reports_dropped.into()),
            ("sensors/read_errors", self.sensors.read_errors.into()),
            ("actuators/faulted", self.faulted_actuators.join(",").as_str().into()),
            ("aim/has_target", self.aim_offset_deg.is_some().into()),
            ("aim/offset_deg", self.aim_offset_deg.unwrap_or(0.0).into()),
        ]
    }
}

/// 最新快照的发布点
///
/// 克隆后共享同一份数据。
#[derive(Clone)]
pub struct TelemetryPublisher {
    latest: Arc<ArcSwap<TelemetrySnapshot>>,
}

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryPublisher {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(ArcSwap::from_pointee(TelemetrySnapshot::default())),
        }
    }

    pub fn publish(&self, snapshot: TelemetrySnapshot) -> Arc<TelemetrySnapshot> {
        let snapshot = Arc::new(snapshot);
        self.latest.store(snapshot.clone());
        snapshot
    }

    /// 无锁读取最新快照
    pub fn load(&self) -> Arc<TelemetrySnapshot> {
        self.latest.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySnapshot {
        TelemetrySnapshot {
            cycle: 7,
            shooter: ShooterTelemetry {
                state: "waiting",
                armed: true,
                at_speed: true,
                measured_velocity: 20_010.0,
                target_velocity: 20_000.0,
                ..Default::default()
            },
            pipeline: PipelineTelemetry {
                status: "idle",
                balls: vec![
                    BallTelemetry { id: 2, stage: "entering" },
                    BallTelemetry { id: 1, stage: "top" },
                ],
                top_occupied: true,
                ..Default::default()
            },
            faulted_actuators: vec!["hopper"],
            ..Default::default()
        }
    }

    #[test]
    fn test_entries_are_flat_scalars() {
        let entries = sample().entries();
        let get = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("shooter/state"), TelemetryValue::Text("waiting".into()));
        assert_eq!(get("pipeline/ball_count"), TelemetryValue::Int(2));
        assert_eq!(get("pipeline/stages"), TelemetryValue::Text("entering,top".into()));
        assert_eq!(get("actuators/faulted"), TelemetryValue::Text("hopper".into()));
        assert_eq!(get("aim/has_target"), TelemetryValue::Bool(false));
        assert_eq!(format!("{}", get("shooter/velocity")), "20010.0");
    }

    #[test]
    fn test_publisher_shares_latest() {
        let publisher = TelemetryPublisher::new();
        let reader = publisher.clone();
        assert_eq!(reader.load().cycle, 0);

        publisher.publish(sample());
        assert_eq!(reader.load().cycle, 7);
        assert_eq!(reader.load().pipeline.balls.len(), 2);
    }
}
