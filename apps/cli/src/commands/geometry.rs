//! 皮带几何计算命令

use anyhow::{Result, bail};
use clap::Args;
use green_indexer::BeltGeometry;

/// 几何参数
#[derive(Args, Debug)]
pub struct GeometryCommand {
    /// 球直径（m）
    #[arg(long, default_value_t = 0.2)]
    pub ball_diameter: f64,

    /// 皮带轮半径（m）
    #[arg(long, default_value_t = 0.009525)]
    pub wheel_radius: f64,

    /// 编码器每转 ticks
    #[arg(long, default_value_t = 2048)]
    pub ticks_per_rev: u32,
}

impl GeometryCommand {
    pub fn geometry(&self) -> BeltGeometry {
        BeltGeometry {
            ball_diameter_m: self.ball_diameter,
            wheel_radius_m: self.wheel_radius,
            ticks_per_rev: self.ticks_per_rev,
        }
    }

    pub fn execute(self) -> Result<()> {
        let geometry = self.geometry();
        if !geometry.is_valid() {
            bail!("geometry values must all be positive: {:?}", geometry);
        }
        println!("ball diameter:     {} m", geometry.ball_diameter_m);
        println!("wheel radius:      {} m", geometry.wheel_radius_m);
        println!("ticks per rev:     {}", geometry.ticks_per_rev);
        println!("circumference:     {:.5} m", geometry.circumference_m());
        println!("required ticks:    {:.2}", geometry.required_ticks());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_radius() {
        let cmd = GeometryCommand {
            ball_diameter: 0.2,
            wheel_radius: 0.0,
            ticks_per_rev: 2048,
        };
        assert!(cmd.execute().is_err());
    }
}
