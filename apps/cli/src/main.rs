//! # Green CLI
//!
//! 控制核心的台架/调试工具。
//!
//! ```bash
//! # 校验配置并输出合并默认值后的完整配置
//! green-cli check-config config/robot.toml --print
//!
//! # 计算一次 shift 的皮带行程
//! green-cli geometry --ball-diameter 0.2 --wheel-radius 0.009525
//!
//! # 在 mock 硬件上运行控制循环（Ctrl-C 退出）
//! green-cli run --config config/robot.toml --balls 5 --json
//! ```
//!
//! 日志输出到 stderr，可通过 `RUST_LOG` 覆盖默认级别。

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod sim;

use commands::{CheckConfigCommand, GeometryCommand, RunCommand};

const DEFAULT_LOG_FILTER: &str =
    "green_cli=info,green_control=info,green_indexer=info,green_sensors=info";

/// Green CLI - 机器人控制核心台架工具
#[derive(Parser, Debug)]
#[command(name = "green-cli")]
#[command(about = "Bench and diagnostics tool for the Green robot control core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 校验配置文件
    CheckConfig {
        #[command(flatten)]
        args: CheckConfigCommand,
    },

    /// 计算一次 shift 的皮带行程
    Geometry {
        #[command(flatten)]
        args: GeometryCommand,
    },

    /// 在 mock 硬件上运行控制循环
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { args } => args.execute(),
        Commands::Geometry { args } => args.execute(),
        Commands::Run { args } => args.execute(),
    }
}
