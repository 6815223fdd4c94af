//! 传感器服务（Sensor Service）
//!
//! 每个服务独占一组数字输入，在自己的线程里按固定周期轮询：
//!
//! ```text
//! ┌──────────────┐  update()   ┌───────────────┐  bounded  ┌────────────────┐
//! │ DigitalInput │ ──────────► │ SensorService │ ────────► │ SensorManager  │
//! │  (break beam)│  每周期一次  │ (previous/cur) │  channel  │ (保留窗口缓冲) │
//! └──────────────┘             └───────────────┘           └────────────────┘
//! ```
//!
//! 队列满时丢弃**最旧**的报告（通过持有接收端克隆实现），保证最新的跳变总能入队。

use crate::metrics::SensorMetrics;
use crate::report::{Report, ReportKind};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use green_hal::{Clock, DigitalInput, HalError, SensorId};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 单次轮询产生的报告（通常 0~2 条）
pub type ReportBatch = SmallVec<[Report; 8]>;

/// 服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    /// 索引器光电开关
    BreakBeam,
    /// 爬升机构接近开关
    ClimbProximity,
}

impl ServiceKind {
    /// 该类服务默认产生的报告类型
    pub fn default_reports(self) -> &'static [ReportKind] {
        match self {
            ServiceKind::BreakBeam => &[ReportKind::Blocked, ReportKind::Cleared],
            ServiceKind::ClimbProximity => &[ReportKind::Transition],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::BreakBeam => "break_beam",
            ServiceKind::ClimbProximity => "climb_proximity",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务实例 ID（管理器内唯一）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 服务运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ServiceStatus {
    #[default]
    Running = 0,
    /// 被管理器停止
    Stopped = 1,
    /// 不可恢复的错误（设备断开、线程 panic）
    Dead = 2,
    /// 已要求停止，线程尚未退出
    Stopping = 3,
}

impl ServiceStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopped,
            3 => Self::Stopping,
            _ => Self::Dead,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 服务状态（原子版本，服务线程与管理器共享）
#[derive(Debug, Default)]
pub struct AtomicServiceStatus {
    inner: AtomicU8,
}

impl AtomicServiceStatus {
    pub fn new(status: ServiceStatus) -> Self {
        Self {
            inner: AtomicU8::new(status.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> ServiceStatus {
        ServiceStatus::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, status: ServiceStatus, ordering: Ordering) {
        self.inner.store(status.as_u8(), ordering);
    }
}

/// 服务描述（交给 [`SensorManager::add_service`](crate::SensorManager::add_service)）
pub struct ServiceSpec {
    pub(crate) kind: ServiceKind,
    pub(crate) inputs: Vec<(SensorId, Box<dyn DigitalInput>)>,
    pub(crate) reports: SmallVec<[ReportKind; 3]>,
    pub(crate) poll_interval: Option<Duration>,
}

impl ServiceSpec {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            reports: kind.default_reports().iter().copied().collect(),
            poll_interval: None,
        }
    }

    /// 添加一个输入
    pub fn with_input(mut self, sensor: SensorId, input: impl DigitalInput + 'static) -> Self {
        self.inputs.push((sensor, Box::new(input)));
        self
    }

    /// 覆盖报告类型集合
    pub fn with_reports(mut self, reports: &[ReportKind]) -> Self {
        self.reports = reports.iter().copied().collect();
        self
    }

    /// 覆盖轮询周期（默认使用管理器配置）
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn sensors(&self) -> impl Iterator<Item = SensorId> + '_ {
        self.inputs.iter().map(|(id, _)| *id)
    }
}

struct InputSlot {
    sensor: SensorId,
    input: Box<dyn DigitalInput>,
    previous: Option<bool>,
    current: Option<bool>,
    /// 本周期读数是否有效
    fresh: bool,
    failing: bool,
}

/// 轮询状态机
///
/// 保存每个输入的 previous/current 读数。第一次成功读数只建立基线，不产生报告。
pub struct SensorService {
    id: ServiceId,
    kind: ServiceKind,
    inputs: Vec<InputSlot>,
    reports: SmallVec<[ReportKind; 3]>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SensorMetrics>,
}

impl SensorService {
    pub(crate) fn new(
        id: ServiceId,
        spec: ServiceSpec,
        clock: Arc<dyn Clock>,
        metrics: Arc<SensorMetrics>,
    ) -> Self {
        let inputs = spec
            .inputs
            .into_iter()
            .map(|(sensor, input)| InputSlot {
                sensor,
                input,
                previous: None,
                current: None,
                fresh: false,
                failing: false,
            })
            .collect();
        Self {
            id,
            kind: spec.kind,
            inputs,
            reports: spec.reports,
            clock,
            metrics,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// 读取所有输入一次，返回满足条件的报告
    ///
    /// 单个输入的可恢复错误只跳过该输入；致命错误（断开）直接返回，服务随之进入 Dead。
    pub fn update(&mut self) -> Result<ReportBatch, HalError> {
        let timestamp_us = self.clock.now_us();

        for slot in &mut self.inputs {
            match slot.input.read() {
                Ok(value) => {
                    if slot.failing {
                        info!(service = %self.id, sensor = %slot.sensor, "sensor recovered");
                        slot.failing = false;
                    }
                    slot.previous = slot.current;
                    slot.current = Some(value);
                    slot.fresh = true;
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
                    if !slot.failing {
                        warn!(service = %self.id, sensor = %slot.sensor, error = %e, "sensor read failed, skipping");
                        slot.failing = true;
                    }
                    slot.fresh = false;
                },
            }
        }

        let mut batch = ReportBatch::new();
        for kind in &self.reports {
            for slot in self.inputs.iter().filter(|s| s.fresh) {
                if let (Some(previous), Some(current)) = (slot.previous, slot.current)
                    && let Some(report) = kind.build(slot.sensor, previous, current, timestamp_us)
                {
                    batch.push(report);
                }
            }
        }
        Ok(batch)
    }
}

/// 服务线程与管理器共享的状态
#[derive(Debug, Clone)]
pub(crate) struct ServiceShared {
    pub is_running: Arc<AtomicBool>,
    pub status: Arc<AtomicServiceStatus>,
    /// 最近一次完成轮询的时间（微秒）
    pub heartbeat_us: Arc<AtomicU64>,
}

impl ServiceShared {
    pub fn new(now_us: u64) -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(true)),
            status: Arc::new(AtomicServiceStatus::new(ServiceStatus::Running)),
            heartbeat_us: Arc::new(AtomicU64::new(now_us)),
        }
    }
}

/// 入队；队列满时丢弃最旧的一条
pub(crate) fn publish(
    tx: &Sender<Report>,
    oldest: &Receiver<Report>,
    mut report: Report,
    metrics: &SensorMetrics,
) -> bool {
    let mut dropped = false;
    loop {
        match tx.try_send(report) {
            Ok(()) => {
                metrics.reports_published.fetch_add(1, Ordering::Relaxed);
                return dropped;
            },
            Err(TrySendError::Full(r)) => {
                if oldest.try_recv().is_ok() {
                    metrics.reports_dropped.fetch_add(1, Ordering::Relaxed);
                    dropped = true;
                }
                report = r;
            },
            Err(TrySendError::Disconnected(_)) => return dropped,
        }
    }
}

/// 服务线程主循环
pub(crate) fn service_loop(
    mut service: SensorService,
    shared: ServiceShared,
    tx: Sender<Report>,
    oldest: Receiver<Report>,
    poll_interval: Duration,
    metrics: Arc<SensorMetrics>,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!(service = %service.id, "sensor thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    service = %service.id,
                    "Failed to set sensor thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    debug!(service = %service.id, kind = %service.kind, "sensor service started");
    let mut overflowing = false;

    loop {
        // Acquire: 看到 false 时必须同时看到管理器的清理写入
        if !shared.is_running.load(Ordering::Acquire) {
            trace!(service = %service.id, "is_running flag is false, exiting");
            shared.status.set(ServiceStatus::Stopped, Ordering::Release);
            break;
        }

        let cycle_start = Instant::now();
        match service.update() {
            Ok(batch) => {
                let mut dropped = false;
                for report in batch {
                    trace!(service = %service.id, sensor = %report.sensor, kind = report.kind.as_str(), "report");
                    dropped |= publish(&tx, &oldest, report, &metrics);
                }
                if dropped && !overflowing {
                    warn!(service = %service.id, "report queue full, dropping oldest reports");
                } else if !dropped && overflowing {
                    debug!(service = %service.id, "report queue drained");
                }
                overflowing = dropped || (overflowing && tx.is_full());
            },
            Err(e) => {
                error!(service = %service.id, kind = %service.kind, error = %e, "sensor service died");
                shared.status.set(ServiceStatus::Dead, Ordering::Release);
                metrics.services_dead.fetch_add(1, Ordering::Relaxed);
                break;
            },
        }

        shared
            .heartbeat_us
            .store(service.clock.now_us(), Ordering::Release);
        metrics.polls.fetch_add(1, Ordering::Relaxed);

        if let Some(remaining) = poll_interval.checked_sub(cycle_start.elapsed()) {
            spin_sleep::sleep(remaining);
        }
    }
}

/// join 超时时的轮询间隔
const JOIN_POLL: Duration = Duration::from_millis(1);

/// 带超时的线程 join
///
/// 超时返回 `Err(self)`，线程句柄交还调用方，之后可以再次 join。
pub(crate) trait JoinTimeout: Sized {
    fn join_timeout(self, timeout: Duration) -> Result<std::thread::Result<()>, Self>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<std::thread::Result<()>, Self> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return Err(self);
            }
            spin_sleep::sleep(JOIN_POLL);
        }
        Ok(self.join().map(|_| ()))
    }
}
