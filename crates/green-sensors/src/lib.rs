//! # Green Sensors
//!
//! 线程化的传感器服务与报告聚合。
//!
//! - [`SensorService`]：独占一组数字输入，在后台线程中按固定周期轮询，产生跳变报告
//! - [`SensorManager`]：汇聚所有服务的报告，按类型缓存并在保留窗口后清除
//! - [`Report`] / [`ReportKind`]：报告类型即谓词（上升沿、下降沿、任意变化）
//!
//! # Example
//!
//! ```rust,ignore
//! // 需要 green-hal 的 `mock` feature
//! use green_hal::{SensorId, SystemClock};
//! use green_hal::mock::MockInput;
//! use green_sensors::{ManagerConfig, ReportKind, SensorManager, ServiceKind, ServiceSpec};
//! use std::sync::Arc;
//!
//! let manager = SensorManager::new(ManagerConfig::default(), Arc::new(SystemClock));
//! let (entry, handle) = MockInput::new(false);
//! manager.add_service(
//!     ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::IntakeEntry, entry),
//! )?;
//!
//! handle.set(true);
//! let blocked = manager.get(ReportKind::Blocked);
//! ```

mod error;
mod manager;
mod metrics;
mod report;
mod service;

pub use error::SensorError;
pub use manager::{ManagerConfig, ReportCursor, SensorManager, ServiceHealth};
pub use metrics::{MetricsSnapshot, SensorMetrics};
pub use report::{Report, ReportKind};
pub use service::{ReportBatch, SensorService, ServiceId, ServiceKind, ServiceSpec, ServiceStatus};
