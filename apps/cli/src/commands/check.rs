//! 配置校验命令

use super::load_config;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// 配置校验参数
#[derive(Args, Debug)]
pub struct CheckConfigCommand {
    /// 配置文件路径（缺省检查内置默认值）
    pub path: Option<PathBuf>,

    /// 输出合并默认值后的完整配置
    #[arg(long)]
    pub print: bool,
}

impl CheckConfigCommand {
    pub fn execute(self) -> Result<()> {
        let config = load_config(self.path.as_deref())?;

        let geometry = config.indexer.geometry();
        let (low, high) = config.shooter.velocity_band();
        println!("✅ config OK");
        println!("  shift travel:   {:.2} ticks", geometry.required_ticks());
        println!("  velocity band:  [{:.0}, {:.0}] ticks/100ms", low, high);
        println!(
            "  control loop:   {} Hz ({:?})",
            config.control.loop_hz,
            config.control.period()
        );
        println!("  retention:      {} ms", config.sensors.retention_ms);

        if self.print {
            let text = toml::to_string_pretty(&config).context("failed to serialize config")?;
            println!();
            print!("{}", text);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_check_ok() {
        let cmd = CheckConfigCommand {
            path: None,
            print: true,
        };
        assert!(cmd.execute().is_ok());
    }
}
