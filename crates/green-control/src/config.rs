//! 机器人配置（TOML）
//!
//! 所有段落都有默认值，配置文件只需写出需要覆盖的字段：
//!
//! ```toml
//! [shooter]
//! target_velocity = 18000.0
//! debounce_cycles = 8
//!
//! [indexer]
//! auto_index = false
//! ```

use crate::error::ConfigError;
use green_indexer::{BeltGeometry, PipelineConfig};
use green_sensors::ManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub sensors: SensorsConfig,
    pub indexer: IndexerConfig,
    pub shooter: ShooterConfig,
    pub intake: IntakeConfig,
    pub climb: ClimbConfig,
    pub control: ControlConfig,
}

/// 传感器服务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub poll_interval_ms: u64,
    pub retention_ms: u64,
    pub queue_capacity: usize,
    pub starvation_timeout_ms: u64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            retention_ms: 200,
            queue_capacity: 100,
            starvation_timeout_ms: 100,
        }
    }
}

impl SensorsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retention: self.retention(),
            queue_capacity: self.queue_capacity,
            starvation_timeout: Duration::from_millis(self.starvation_timeout_ms),
            ..ManagerConfig::default()
        }
    }
}

/// 索引器皮带
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub ball_diameter_m: f64,
    pub wheel_radius_m: f64,
    pub ticks_per_rev: u32,
    pub position_tolerance_ticks: f64,
    pub shift_timeout_ms: u64,
    pub auto_index: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let geometry = BeltGeometry::default();
        Self {
            ball_diameter_m: geometry.ball_diameter_m,
            wheel_radius_m: geometry.wheel_radius_m,
            ticks_per_rev: geometry.ticks_per_rev,
            position_tolerance_ticks: 40.0,
            shift_timeout_ms: 1500,
            auto_index: true,
        }
    }
}

impl IndexerConfig {
    pub fn geometry(&self) -> BeltGeometry {
        BeltGeometry {
            ball_diameter_m: self.ball_diameter_m,
            wheel_radius_m: self.wheel_radius_m,
            ticks_per_rev: self.ticks_per_rev,
        }
    }

    /// 佐证窗口取传感器保留窗口
    pub fn pipeline_config(&self, corroboration_window: Duration) -> PipelineConfig {
        PipelineConfig {
            geometry: self.geometry(),
            position_tolerance_ticks: self.position_tolerance_ticks,
            shift_timeout: Duration::from_millis(self.shift_timeout_ms),
            corroboration_window,
            auto_index: self.auto_index,
        }
    }
}

/// 发射器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShooterConfig {
    /// 目标转速（ticks/100ms）
    pub target_velocity: f64,
    /// 转速容差（目标的比例）
    pub velocity_tolerance: f64,
    /// 连续在带内的周期数
    pub debounce_cycles: u32,
    /// 瞄准容差（度）
    pub aim_tolerance_deg: f64,
    /// 没有目标时是否禁止发射
    pub require_target: bool,
    /// 出口光电的超时兜底（ms）
    pub shot_timeout_ms: u64,
    /// 低于该转速视为已停止
    pub stopped_velocity: f64,
}

impl Default for ShooterConfig {
    fn default() -> Self {
        Self {
            target_velocity: 20_000.0,
            velocity_tolerance: 0.02,
            debounce_cycles: 5,
            aim_tolerance_deg: 1.5,
            require_target: true,
            shot_timeout_ms: 750,
            stopped_velocity: 200.0,
        }
    }
}

impl ShooterConfig {
    /// 转速带 [low, high]
    pub fn velocity_band(&self) -> (f64, f64) {
        let margin = self.target_velocity.abs() * self.velocity_tolerance;
        (self.target_velocity - margin, self.target_velocity + margin)
    }

    pub fn shot_timeout(&self) -> Duration {
        Duration::from_millis(self.shot_timeout_ms)
    }
}

/// 进球机构与料斗
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub intake_power: f64,
    pub hopper_power: f64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            intake_power: 0.8,
            hopper_power: 0.5,
        }
    }
}

/// 爬升机构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimbConfig {
    pub ticks_to_full: f64,
    pub position_tolerance_ticks: f64,
    pub winch_power: f64,
}

impl Default for ClimbConfig {
    fn default() -> Self {
        Self {
            ticks_to_full: 19_456.0,
            position_tolerance_ticks: 60.0,
            winch_power: 1.0,
        }
    }
}

/// 控制循环
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub loop_hz: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { loop_hz: 50 }
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.loop_hz.max(1) as f64)
    }
}

impl RobotConfig {
    /// 从 TOML 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RobotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sensors;
        if s.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("sensors.poll_interval_ms", "must be > 0"));
        }
        if s.retention_ms == 0 {
            return Err(ConfigError::invalid("sensors.retention_ms", "must be > 0"));
        }
        if s.queue_capacity == 0 {
            return Err(ConfigError::invalid("sensors.queue_capacity", "must be > 0"));
        }
        if s.starvation_timeout_ms == 0 {
            return Err(ConfigError::invalid("sensors.starvation_timeout_ms", "must be > 0"));
        }

        let i = &self.indexer;
        if !(i.ball_diameter_m > 0.0) {
            return Err(ConfigError::invalid("indexer.ball_diameter_m", "must be > 0"));
        }
        if !(i.wheel_radius_m > 0.0) {
            return Err(ConfigError::invalid("indexer.wheel_radius_m", "must be > 0"));
        }
        if i.ticks_per_rev == 0 {
            return Err(ConfigError::invalid("indexer.ticks_per_rev", "must be > 0"));
        }
        if !(i.position_tolerance_ticks > 0.0) {
            return Err(ConfigError::invalid(
                "indexer.position_tolerance_ticks",
                "must be > 0 (exact position compare is unreliable)",
            ));
        }
        if i.position_tolerance_ticks >= i.geometry().required_ticks() / 2.0 {
            return Err(ConfigError::invalid(
                "indexer.position_tolerance_ticks",
                format!(
                    "must be less than half a shift ({:.0} ticks)",
                    i.geometry().required_ticks() / 2.0
                ),
            ));
        }
        if i.shift_timeout_ms == 0 {
            return Err(ConfigError::invalid("indexer.shift_timeout_ms", "must be > 0"));
        }

        let sh = &self.shooter;
        if !(sh.target_velocity > 0.0) {
            return Err(ConfigError::invalid("shooter.target_velocity", "must be > 0"));
        }
        if !(sh.velocity_tolerance > 0.0 && sh.velocity_tolerance < 1.0) {
            return Err(ConfigError::invalid("shooter.velocity_tolerance", "must be in (0, 1)"));
        }
        if sh.debounce_cycles == 0 {
            return Err(ConfigError::invalid("shooter.debounce_cycles", "must be > 0"));
        }
        if !(sh.aim_tolerance_deg > 0.0) {
            return Err(ConfigError::invalid("shooter.aim_tolerance_deg", "must be > 0"));
        }
        if sh.shot_timeout_ms == 0 {
            return Err(ConfigError::invalid("shooter.shot_timeout_ms", "must be > 0"));
        }
        if !(sh.stopped_velocity >= 0.0) {
            return Err(ConfigError::invalid("shooter.stopped_velocity", "must be >= 0"));
        }

        for (field, power) in [
            ("intake.intake_power", self.intake.intake_power),
            ("intake.hopper_power", self.intake.hopper_power),
            ("climb.winch_power", self.climb.winch_power),
        ] {
            if !(-1.0..=1.0).contains(&power) {
                return Err(ConfigError::invalid(field, "must be in [-1, 1]"));
            }
        }

        let c = &self.climb;
        if !(c.ticks_to_full > 0.0) {
            return Err(ConfigError::invalid("climb.ticks_to_full", "must be > 0"));
        }
        if !(c.position_tolerance_ticks > 0.0) {
            return Err(ConfigError::invalid("climb.position_tolerance_ticks", "must be > 0"));
        }

        if self.control.loop_hz == 0 {
            return Err(ConfigError::invalid("control.loop_hz", "must be > 0"));
        }
        Ok(())
    }
}
