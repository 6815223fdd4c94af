//! 传感器子系统错误类型

use crate::service::ServiceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    /// 服务不存在（已移除或从未注册）
    #[error("Sensor service {0} not found")]
    ServiceNotFound(ServiceId),

    /// 服务没有输入
    #[error("Sensor service has no inputs")]
    NoInputs,

    /// 线程创建失败
    #[error("Failed to spawn sensor thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// 线程未能在超时内退出
    #[error("Sensor service {0} did not stop within timeout")]
    JoinTimeout(ServiceId),

    /// 线程 panic
    #[error("Sensor service {0} panicked")]
    Panicked(ServiceId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_error_display() {
        let err = SensorError::ServiceNotFound(ServiceId(7));
        assert_eq!(format!("{}", err), "Sensor service #7 not found");

        let err = SensorError::JoinTimeout(ServiceId(2));
        assert!(format!("{}", err).contains("#2"));
    }
}
