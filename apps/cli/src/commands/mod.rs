//! 命令定义和实现

pub mod check;
pub mod geometry;
pub mod run;

pub use check::CheckConfigCommand;
pub use geometry::GeometryCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use green_control::RobotConfig;
use std::path::Path;

/// 加载配置；未指定路径时使用内置默认值
pub(crate) fn load_config(path: Option<&Path>) -> Result<RobotConfig> {
    match path {
        Some(path) => RobotConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RobotConfig::default()),
    }
}
