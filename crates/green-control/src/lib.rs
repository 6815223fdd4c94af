//! # Green Control
//!
//! 控制核心的上层：发射器起转协调、进球、爬升，以及把它们组合在一起的 [`Robot`]。
//!
//! ```text
//! SensorManager ──reports──→ BallPipeline ──ball at Top──→ ShooterCoordinator
//!                                 ↑                              │
//!                                 └──── request_shift_forward ───┘
//! ```
//!
//! - [`Robot`]：组合根，拥有全部子系统，`tick()` 为一个控制周期
//! - [`RobotConfig`]：TOML 配置，所有字段都有默认值
//! - [`TelemetrySnapshot`]：每周期的只读状态，经 [`TelemetryPublisher`] 无锁发布
//!
//! # Example
//!
//! ```rust,ignore
//! use green_control::{NoTarget, Robot, RobotConfig};
//! use green_hal::SystemClock;
//!
//! let config = RobotConfig::load("config/robot.toml")?;
//! let mut robot = Robot::new(config, actuators, sensors, NoTarget, Arc::new(SystemClock))?;
//!
//! robot.request_intake(true);
//! robot.request_spool();
//! loop {
//!     let snapshot = robot.tick();
//!     // ...
//! }
//! ```

mod climb;
mod config;
mod error;
mod intake;
mod robot;
mod shooter;
mod targeting;
mod telemetry;

pub use climb::{BarContact, ClimbController, ClimbState};
pub use config::{
    ClimbConfig, ControlConfig, IndexerConfig, IntakeConfig, RobotConfig, SensorsConfig,
    ShooterConfig,
};
pub use error::{ConfigError, ControlError, RequestOutcome};
pub use intake::IntakeController;
pub use robot::Robot;
pub use shooter::{ShooterCoordinator, ShooterState};
pub use targeting::{FixedTarget, NoTarget, SharedTarget, TargetingInput};
pub use telemetry::{
    BallTelemetry, ClimbTelemetry, IntakeTelemetry, PipelineTelemetry, SensorTelemetry,
    ShooterTelemetry, TelemetryPublisher, TelemetrySnapshot, TelemetryValue,
};
