//! 控制层错误类型

use green_hal::MotorId;
use green_sensors::SensorError;
use std::path::PathBuf;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 组合根构造错误
#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("Required actuator {0} is not registered")]
    MissingActuator(MotorId),
}

/// 操作员请求的处理结果
///
/// 请求永远不会以错误的形式穿过控制循环边界：非法请求被拒绝并记录日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 已接受并生效
    Accepted,
    /// 已处于目标状态，无需操作
    Ignored,
    /// 当前状态下不允许（或执行器故障）
    Rejected,
}

impl RequestOutcome {
    pub fn is_accepted(self) -> bool {
        self == RequestOutcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::invalid("shooter.velocity_tolerance", "must be in (0, 1)");
        assert_eq!(
            format!("{}", err),
            "Invalid config value shooter.velocity_tolerance: must be in (0, 1)"
        );

        let err = ControlError::MissingActuator(MotorId::ShooterWheel);
        assert!(format!("{}", err).contains("shooter_wheel"));
    }
}
