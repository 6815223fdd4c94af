//! 台架运行命令
//!
//! 在 mock 硬件上以固定频率运行完整控制循环：送球、起转、发射，直到所有球发射完毕、
//! 超时或收到 Ctrl-C。

use super::load_config;
use crate::sim::SimHardware;
use anyhow::{Context, Result};
use clap::Args;
use green_control::{Robot, SharedTarget, TelemetrySnapshot};
use green_hal::{Clock, SensorId, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 送球间隔
const FEED_INTERVAL: Duration = Duration::from_millis(200);

/// 台架运行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 配置文件（缺省使用内置默认值）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 模拟送入的球数
    #[arg(short, long, default_value_t = 5)]
    pub balls: u64,

    /// 最长运行时间（秒）
    #[arg(short, long, default_value_t = 15.0)]
    pub duration_secs: f64,

    /// 目标水平偏角（度）
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub aim: f64,

    /// 模拟没有目标
    #[arg(long)]
    pub no_target: bool,

    /// 每 N 个周期输出一次遥测
    #[arg(long, default_value_t = 25)]
    pub print_every: u64,

    /// 以 JSON 行输出遥测
    #[arg(long)]
    pub json: bool,

    /// 文本遥测只输出这些键前缀
    #[arg(
        long = "watch",
        value_delimiter = ',',
        default_value = "shooter/state,shooter/velocity,shooter/shots_fired,pipeline/status,pipeline/stages,pipeline/loading"
    )]
    pub watch: Vec<String>,
}

/// 模拟操作员
struct Operator {
    balls: u64,
    fed: u64,
    last_feed: Option<Instant>,
}

impl Operator {
    fn act(&mut self, robot: &mut Robot, sim: &mut SimHardware, snapshot: &TelemetrySnapshot) {
        let pipeline = &snapshot.pipeline;

        if self.fed < self.balls
            && pipeline.accepting
            && self.last_feed.is_none_or(|t| t.elapsed() >= FEED_INTERVAL)
        {
            sim.pulse(SensorId::IntakeEntry);
            self.fed += 1;
            self.last_feed = Some(Instant::now());
        }

        let at_shooter = pipeline.balls.iter().any(|b| b.stage == "shooting");
        if at_shooter {
            sim.pulse(SensorId::ShooterExit);
        }

        if snapshot.shooter.state == "waiting" && !snapshot.shooter.armed {
            robot.request_shoot();
        }

        // 球数不足以把球顶到 Top 时连续前移
        if snapshot.shooter.armed
            && !pipeline.top_occupied
            && !pipeline.balls.is_empty()
            && !at_shooter
            && !pipeline.loading
        {
            robot.request_load_to_top();
        }
    }

    fn done(&self, snapshot: &TelemetrySnapshot) -> bool {
        self.fed == self.balls && snapshot.shooter.shots_fired >= self.balls
    }
}

impl RunCommand {
    pub fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let period = config.control.period();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (mut sim, actuators) = SimHardware::build(&config, clock.clone())?;
        let target = SharedTarget::new();
        if !self.no_target {
            target.set(self.aim);
        }
        let mut robot = Robot::new(config, actuators, sim.sensors.clone(), target, clock)
            .context("failed to build robot")?;

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;

        robot.request_intake(true);
        robot.request_spool();

        let mut operator = Operator {
            balls: self.balls,
            fed: 0,
            last_feed: None,
        };
        let started = Instant::now();
        let deadline = started + Duration::from_secs_f64(self.duration_secs.max(0.0));
        let mut next = started;
        let mut overruns = 0u64;

        info!(balls = self.balls, ?period, "bench run started");
        let last = loop {
            sim.begin_cycle();
            let snapshot = robot.tick();
            sim.mirror_stages(&snapshot);
            operator.act(&mut robot, &mut sim, &snapshot);

            if self.print_every > 0 && snapshot.cycle % self.print_every == 0 {
                self.print(&snapshot)?;
            }
            if operator.done(&snapshot) {
                info!(cycles = snapshot.cycle, "all balls fired");
                break snapshot;
            }
            if !running.load(Ordering::SeqCst) {
                info!("interrupted");
                break snapshot;
            }
            if Instant::now() >= deadline {
                warn!(fed = operator.fed, shots = snapshot.shooter.shots_fired, "run timed out");
                break snapshot;
            }

            next += period;
            let now = Instant::now();
            if next > now {
                spin_sleep::sleep(next - now);
            } else {
                overruns += 1;
                debug!(behind = ?(now - next), "control loop overrun");
                next = now;
            }
        };

        robot.request_cease_fire();
        robot.request_intake(false);
        robot.shutdown().context("failed to stop sensor services")?;

        if self.json {
            println!("{}", serde_json::to_string(&*last).context("failed to serialize telemetry")?);
        }
        println!("balls fed:      {}", operator.fed);
        println!("shots fired:    {}", last.shooter.shots_fired);
        println!("balls in robot: {}", last.pipeline.balls.len());
        println!("cycles:         {} ({} overruns)", last.cycle, overruns);
        println!("elapsed:        {:.2?}", started.elapsed());
        Ok(())
    }

    fn print(&self, snapshot: &TelemetrySnapshot) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(snapshot).context("failed to serialize telemetry")?);
            return Ok(());
        }
        let fields: Vec<String> = snapshot
            .entries()
            .into_iter()
            .filter(|(key, _)| self.watch.iter().any(|w| key.starts_with(w.as_str())))
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        println!(
            "#{:<5} {}{}",
            snapshot.cycle,
            fields.join(" "),
            if snapshot.sensors.starved { " | SENSORS STARVED" } else { "" },
        );
        Ok(())
    }
}
