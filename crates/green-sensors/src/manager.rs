//! 传感器管理器（Sensor Manager）
//!
//! 管理器是报告的唯一汇聚点：
//! - 服务注册/注销（每个服务一个线程）
//! - 按报告类型缓存报告，超过保留窗口自动清除
//! - 健康检查（服务 Dead / 心跳超时）
//!
//! 所有共享状态由**一把锁**保护；锁内只做内存操作，不会等待服务线程，
//! 因此 [`SensorManager::get`] 不会阻塞在硬件 I/O 上。

use crate::error::SensorError;
use crate::metrics::{MetricsSnapshot, SensorMetrics};
use crate::report::{Report, ReportKind};
use crate::service::{
    JoinTimeout, SensorService, ServiceId, ServiceKind, ServiceShared, ServiceSpec, ServiceStatus,
    service_loop,
};
use crossbeam_channel::Receiver;
use green_hal::{Clock, SensorId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 管理器配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerConfig {
    /// 默认轮询周期
    pub poll_interval: Duration,
    /// 报告保留窗口
    pub retention: Duration,
    /// 每个服务的队列容量
    pub queue_capacity: usize,
    /// 心跳超时（超过即视为饥饿）
    pub starvation_timeout: Duration,
    /// 停止服务时等待线程退出的超时
    pub join_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            retention: Duration::from_millis(200),
            queue_capacity: 100,
            starvation_timeout: Duration::from_millis(100),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// 增量读取游标
///
/// 配合 [`SensorManager::poll_new`] 使用，每条报告对同一个游标只返回一次。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportCursor {
    last_seq: u64,
}

impl ReportCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

/// 服务健康状况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHealth {
    pub id: ServiceId,
    pub kind: ServiceKind,
    pub status: ServiceStatus,
    /// 运行中但心跳超时
    pub starved: bool,
    pub last_poll_age: Duration,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Running && !self.starved
    }
}

struct ServiceHandle {
    id: ServiceId,
    kind: ServiceKind,
    sensors: Vec<SensorId>,
    shared: ServiceShared,
    rx: Receiver<Report>,
    /// join 进行中时为 `None`
    thread: Option<JoinHandle<()>>,
    /// 已拉低运行标志
    stopping: bool,
    /// 是否已记录线程异常退出
    reaped: bool,
}

impl ServiceHandle {
    fn kill(&mut self) {
        self.shared.is_running.store(false, Ordering::Release);
        self.stopping = true;
    }

    fn status(&self) -> ServiceStatus {
        match self.shared.status.get(Ordering::Acquire) {
            ServiceStatus::Running if self.stopping => ServiceStatus::Stopping,
            status => status,
        }
    }
}

struct Inner {
    services: BTreeMap<ServiceKind, Vec<ServiceHandle>>,
    buffers: HashMap<ReportKind, VecDeque<Report>>,
    next_seq: u64,
    next_service_id: u64,
}

/// 传感器管理器
///
/// 通常由组合根创建一个，以 `Arc` 共享。`Drop` 时停止所有服务。
pub struct SensorManager {
    inner: Mutex<Inner>,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<SensorMetrics>,
}

impl SensorManager {
    pub fn new(config: ManagerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                services: BTreeMap::new(),
                buffers: HashMap::new(),
                next_seq: 1,
                next_service_id: 1,
            }),
            config,
            clock,
            metrics: Arc::new(SensorMetrics::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// 注册并启动一个服务
    pub fn add_service(&self, spec: ServiceSpec) -> Result<ServiceId, SensorError> {
        if spec.inputs.is_empty() {
            return Err(SensorError::NoInputs);
        }

        let mut inner = self.inner.lock();
        let id = ServiceId(inner.next_service_id);
        inner.next_service_id += 1;

        let kind = spec.kind;
        let sensors: Vec<SensorId> = spec.sensors().collect();
        let poll_interval = spec.poll_interval.unwrap_or(self.config.poll_interval);
        let (tx, rx) = crossbeam_channel::bounded(self.config.queue_capacity.max(1));
        let shared = ServiceShared::new(self.clock.now_us());

        let service = SensorService::new(id, spec, self.clock.clone(), self.metrics.clone());
        let thread = {
            let shared = shared.clone();
            let oldest = rx.clone();
            let metrics = self.metrics.clone();
            std::thread::Builder::new()
                .name(format!("sensor-{}-{}", kind, id.0))
                .spawn(move || service_loop(service, shared, tx, oldest, poll_interval, metrics))?
        };

        info!(service = %id, %kind, ?sensors, "sensor service added");
        inner.services.entry(kind).or_default().push(ServiceHandle {
            id,
            kind,
            sensors,
            shared,
            rx,
            thread: Some(thread),
            stopping: false,
            reaped: false,
        });
        Ok(id)
    }

    /// 停止并移除某一类的所有服务，返回移除数量
    ///
    /// 线程退出后才从存活集合中移除，退出前发布的报告都会被收集。
    /// join 超时的服务保留为 [`ServiceStatus::Stopping`]，可再次调用移除。
    pub fn remove_services(&self, kind: ServiceKind) -> Result<usize, SensorError> {
        let count = self.stop_where(|h| h.kind == kind)?;
        info!(%kind, count, "sensor services removed");
        Ok(count)
    }

    /// 停止并移除单个服务
    pub fn remove_service(&self, id: ServiceId) -> Result<(), SensorError> {
        match self.stop_where(|h| h.id == id)? {
            0 => Err(SensorError::ServiceNotFound(id)),
            _ => Ok(()),
        }
    }

    /// 当前保留窗口内某类型的全部报告（按到达顺序）
    pub fn get(&self, kind: ReportKind) -> Vec<Report> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner
            .buffers
            .get(&kind)
            .map(|buf| buf.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 某类型且来自指定传感器的报告
    pub fn get_for(&self, kind: ReportKind, sensor: SensorId) -> Vec<Report> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner
            .buffers
            .get(&kind)
            .map(|buf| buf.iter().filter(|r| r.sensor == sensor).copied().collect())
            .unwrap_or_default()
    }

    /// 自游标以来的新报告（按到达顺序），并推进游标
    pub fn poll_new(&self, kind: ReportKind, cursor: &mut ReportCursor) -> Vec<Report> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let fresh: Vec<Report> = inner
            .buffers
            .get(&kind)
            .map(|buf| {
                buf.iter()
                    .filter(|r| r.seq > cursor.last_seq)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(last) = fresh.iter().map(|r| r.seq).max() {
            cursor.last_seq = last;
        }
        fresh
    }

    /// 所有服务的健康状况
    pub fn health(&self) -> Vec<ServiceHealth> {
        let mut inner = self.inner.lock();
        let now_us = self.clock.now_us();
        let starvation = self.config.starvation_timeout;

        let mut out = Vec::new();
        for handle in inner.services.values_mut().flatten() {
            Self::reap(handle, &self.metrics);
            let status = handle.status();
            let last_poll_age = Duration::from_micros(
                now_us.saturating_sub(handle.shared.heartbeat_us.load(Ordering::Acquire)),
            );
            out.push(ServiceHealth {
                id: handle.id,
                kind: handle.kind,
                status,
                starved: status == ServiceStatus::Running && last_poll_age > starvation,
                last_poll_age,
            });
        }
        out
    }

    /// 是否有服务 Dead 或心跳超时
    pub fn is_starved(&self) -> bool {
        self.health().iter().any(|h| !h.is_healthy())
    }

    /// 某个传感器是否由运行中的服务覆盖
    pub fn is_covered(&self, sensor: SensorId) -> bool {
        self.health_of(sensor)
            .is_some_and(|h| h.status == ServiceStatus::Running)
    }

    fn health_of(&self, sensor: SensorId) -> Option<ServiceHealth> {
        let owner = {
            let inner = self.inner.lock();
            inner
                .services
                .values()
                .flatten()
                .find(|h| h.sensors.contains(&sensor))
                .map(|h| h.id)
        }?;
        self.health().into_iter().find(|h| h.id == owner)
    }

    pub fn service_count(&self) -> usize {
        self.inner.lock().services.values().map(Vec::len).sum()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 停止所有服务
    ///
    /// 先统一拉低运行标志，再逐个 join，总等待时间约为一个 join 超时。
    /// 返回停止的服务数；未能退出的服务保留为 `Stopping`。
    pub fn shutdown(&self) -> Result<usize, SensorError> {
        match self.stop_where(|_| true) {
            Ok(count) => {
                if count > 0 {
                    info!(count, "sensor services stopped");
                }
                Ok(count)
            },
            Err(e) => {
                error!(error = %e, "sensor shutdown incomplete");
                Err(e)
            },
        }
    }

    /// 拉低运行标志 → join（锁外）→ 收集剩余报告 → 移出存活集合
    ///
    /// 返回移除数量；有线程未能退出时返回第一个错误，其余已退出的服务照常移除。
    fn stop_where(&self, pred: impl Fn(&ServiceHandle) -> bool) -> Result<usize, SensorError> {
        let mut first_err = None;
        let threads: Vec<(ServiceId, JoinHandle<()>)> = {
            let mut inner = self.inner.lock();
            let mut threads = Vec::new();
            for handle in inner.services.values_mut().flatten().filter(|h| pred(h)) {
                handle.kill();
                match handle.thread.take() {
                    Some(thread) => threads.push((handle.id, thread)),
                    // 另一个调用方正在 join
                    None => {
                        first_err.get_or_insert(SensorError::JoinTimeout(handle.id));
                    },
                }
            }
            threads
        };

        let deadline = Instant::now() + self.config.join_timeout;
        let mut exited = Vec::with_capacity(threads.len());
        let mut running = Vec::new();
        for (id, thread) in threads {
            match thread.join_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(Ok(())) => exited.push(id),
                Ok(Err(_)) => {
                    error!(service = %id, "sensor thread panicked");
                    first_err.get_or_insert(SensorError::Panicked(id));
                    exited.push(id);
                },
                Err(thread) => {
                    warn!(
                        service = %id,
                        "sensor thread did not exit within {:?}",
                        self.config.join_timeout
                    );
                    first_err.get_or_insert(SensorError::JoinTimeout(id));
                    running.push((id, thread));
                },
            }
        }

        let mut inner = self.inner.lock();
        self.ingest(&mut inner);
        for handle in inner.services.values_mut().flatten() {
            if let Some(pos) = running.iter().position(|(id, _)| *id == handle.id) {
                handle.thread = Some(running.swap_remove(pos).1);
            }
        }
        for handles in inner.services.values_mut() {
            handles.retain(|h| !exited.contains(&h.id));
        }
        inner.services.retain(|_, handles| !handles.is_empty());
        drop(inner);

        first_err.map_or(Ok(exited.len()), Err)
    }

    fn refresh(&self, inner: &mut Inner) {
        self.ingest(inner);
        self.purge(inner);
    }

    /// 收集所有服务队列中的报告，分配全局序号
    fn ingest(&self, inner: &mut Inner) {
        let Inner {
            services,
            buffers,
            next_seq,
            ..
        } = inner;
        for handle in services.values().flatten() {
            while let Ok(mut report) = handle.rx.try_recv() {
                report.seq = *next_seq;
                *next_seq += 1;
                buffers.entry(report.kind).or_default().push_back(report);
            }
        }
    }

    fn purge(&self, inner: &mut Inner) {
        let now_us = self.clock.now_us();
        let retention = self.config.retention;
        let mut expired = 0u64;
        for buf in inner.buffers.values_mut() {
            let before = buf.len();
            buf.retain(|r| !r.is_expired(now_us, retention));
            expired += (before - buf.len()) as u64;
        }
        if expired > 0 {
            self.metrics
                .reports_expired
                .fetch_add(expired, Ordering::Relaxed);
        }
    }

    /// 检测意外退出的线程（panic）并标记为 Dead
    fn reap(handle: &mut ServiceHandle, metrics: &SensorMetrics) {
        if handle.reaped {
            return;
        }
        let finished = handle.thread.as_ref().is_some_and(|t| t.is_finished());
        if finished && handle.status() == ServiceStatus::Running {
            error!(service = %handle.id, kind = %handle.kind, "sensor thread exited unexpectedly");
            handle
                .shared
                .status
                .set(ServiceStatus::Dead, Ordering::Release);
            metrics.services_dead.fetch_add(1, Ordering::Relaxed);
            handle.reaped = true;
        }
    }

    #[cfg(test)]
    fn inject(&self, report: Report) {
        let mut inner = self.inner.lock();
        let mut report = report;
        report.seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .buffers
            .entry(report.kind)
            .or_default()
            .push_back(report);
    }
}

impl Drop for SensorManager {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use green_hal::ManualClock;

    fn manager(retention_ms: u64) -> (SensorManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = ManagerConfig {
            retention: Duration::from_millis(retention_ms),
            ..ManagerConfig::default()
        };
        (SensorManager::new(config, clock.clone()), clock)
    }

    fn blocked(sensor: SensorId, ts: u64) -> Report {
        ReportKind::Blocked.build(sensor, false, true, ts).unwrap()
    }

    #[test]
    fn test_retention_window() {
        let (manager, clock) = manager(100);
        manager.inject(blocked(SensorId::IntakeEntry, 0));

        clock.set(90_000);
        assert_eq!(manager.get(ReportKind::Blocked).len(), 1);

        clock.set(110_000);
        assert!(manager.get(ReportKind::Blocked).is_empty());
        assert_eq!(manager.metrics().reports_expired, 1);
    }

    #[test]
    fn test_get_filters_by_kind_and_sensor() {
        let (manager, _clock) = manager(200);
        manager.inject(blocked(SensorId::Top, 0));
        manager.inject(blocked(SensorId::IntakeEntry, 0));
        manager.inject(
            ReportKind::Cleared
                .build(SensorId::Top, true, false, 0)
                .unwrap(),
        );

        assert_eq!(manager.get(ReportKind::Blocked).len(), 2);
        assert_eq!(manager.get(ReportKind::Cleared).len(), 1);
        assert!(manager.get(ReportKind::Transition).is_empty());
        assert_eq!(manager.get_for(ReportKind::Blocked, SensorId::Top).len(), 1);
    }

    #[test]
    fn test_cursor_returns_each_report_once() {
        let (manager, _clock) = manager(200);
        let mut cursor = ReportCursor::new();

        manager.inject(blocked(SensorId::Top, 0));
        assert_eq!(manager.poll_new(ReportKind::Blocked, &mut cursor).len(), 1);
        assert!(manager.poll_new(ReportKind::Blocked, &mut cursor).is_empty());

        manager.inject(blocked(SensorId::Top, 10));
        let fresh = manager.poll_new(ReportKind::Blocked, &mut cursor);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].timestamp_us, 10);
        // get() 仍然返回窗口内的全部报告
        assert_eq!(manager.get(ReportKind::Blocked).len(), 2);
    }

    #[test]
    fn test_add_service_requires_inputs() {
        let (manager, _clock) = manager(200);
        let err = manager
            .add_service(ServiceSpec::new(ServiceKind::BreakBeam))
            .unwrap_err();
        assert!(matches!(err, SensorError::NoInputs));
    }

    #[test]
    fn test_remove_unknown_service() {
        let (manager, _clock) = manager(200);
        assert!(matches!(
            manager.remove_service(ServiceId(42)),
            Err(SensorError::ServiceNotFound(ServiceId(42)))
        ));
        assert_eq!(manager.remove_services(ServiceKind::BreakBeam).unwrap(), 0);
    }
}
