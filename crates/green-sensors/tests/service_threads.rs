//! 传感器服务线程集成测试（真实线程 + mock 输入 + 手动时钟）

use green_hal::mock::MockInput;
use green_hal::{HalError, ManualClock, SensorId};
use green_sensors::{
    ManagerConfig, ReportCursor, ReportKind, SensorError, SensorManager, ServiceKind, ServiceSpec,
    ServiceStatus,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(retention_ms: u64) -> (SensorManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = ManagerConfig {
        poll_interval: Duration::from_millis(1),
        retention: Duration::from_millis(retention_ms),
        ..ManagerConfig::default()
    };
    (SensorManager::new(config, clock.clone()), clock)
}

/// 在真实时间内等待条件成立
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_report_expires_after_retention() {
    let (manager, clock) = setup(100);
    let (input, handle) = MockInput::new(false);
    manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::IntakeEntry, input))
        .unwrap();

    // 等待基线读数
    assert!(wait_until(|| handle.reads() >= 2));
    handle.set(true);
    assert!(wait_until(|| !manager.get(ReportKind::Blocked).is_empty()));

    let report = manager.get(ReportKind::Blocked)[0];
    assert_eq!(report.sensor, SensorId::IntakeEntry);
    assert_eq!(report.timestamp_us, 0);

    clock.set(90_000);
    assert_eq!(manager.get(ReportKind::Blocked).len(), 1);

    clock.set(110_000);
    assert!(manager.get(ReportKind::Blocked).is_empty());
}

#[test]
fn test_cursor_sees_edges_in_order() {
    let (manager, _clock) = setup(10_000);
    let (input, handle) = MockInput::new(false);
    manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::Top, input))
        .unwrap();
    assert!(wait_until(|| handle.reads() >= 2));

    let mut cursor = ReportCursor::new();
    handle.set(true);
    assert!(wait_until(|| !manager.get(ReportKind::Blocked).is_empty()));
    handle.set(false);
    assert!(wait_until(|| !manager.get(ReportKind::Cleared).is_empty()));

    let blocked = manager.poll_new(ReportKind::Blocked, &mut cursor);
    assert_eq!(blocked.len(), 1);
    let cleared = manager.poll_new(ReportKind::Cleared, &mut cursor);
    assert_eq!(cleared.len(), 1);
    assert!(cleared[0].seq > blocked[0].seq);
    assert!(manager.poll_new(ReportKind::Cleared, &mut cursor).is_empty());
}

#[test]
fn test_disconnected_input_kills_service() {
    let (manager, _clock) = setup(200);
    let (input, handle) = MockInput::new(false);
    manager
        .add_service(ServiceSpec::new(ServiceKind::ClimbProximity).with_input(SensorId::ClimbLeft, input))
        .unwrap();

    handle.fail_with(HalError::Disconnected("dio 8".into()));
    assert!(wait_until(|| manager
        .health()
        .iter()
        .any(|h| h.status == ServiceStatus::Dead)));
    assert!(manager.is_starved());
    assert!(!manager.is_covered(SensorId::ClimbLeft));
    assert_eq!(manager.metrics().services_dead, 1);
}

#[test]
fn test_removed_services_are_not_starved() {
    let (manager, clock) = setup(200);
    let (input, handle) = MockInput::new(false);
    manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::Top, input))
        .unwrap();
    assert!(wait_until(|| handle.reads() >= 1));
    assert!(!manager.is_starved());

    // 删除服务后再推进时钟：没有服务就没有饥饿
    assert_eq!(manager.remove_services(ServiceKind::BreakBeam).unwrap(), 1);
    clock.advance(Duration::from_secs(1));
    assert!(!manager.is_starved());
    assert_eq!(manager.service_count(), 0);
}

#[test]
fn test_remove_service_stops_polling() {
    let (manager, _clock) = setup(200);
    let (input, handle) = MockInput::new(false);
    let id = manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::Top, input))
        .unwrap();
    assert!(wait_until(|| handle.reads() >= 3));

    manager.remove_service(id).unwrap();
    let reads = handle.reads();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(handle.reads(), reads);
}

#[test]
fn test_shutdown_stops_all_services() {
    let (manager, _clock) = setup(200);
    let (a, a_handle) = MockInput::new(false);
    let (b, b_handle) = MockInput::new(false);
    manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::Top, a))
        .unwrap();
    manager
        .add_service(ServiceSpec::new(ServiceKind::ClimbProximity).with_input(SensorId::ClimbRight, b))
        .unwrap();
    assert!(wait_until(|| a_handle.reads() >= 1 && b_handle.reads() >= 1));

    manager.shutdown().unwrap();
    assert_eq!(manager.service_count(), 0);
    let reads = (a_handle.reads(), b_handle.reads());
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!((a_handle.reads(), b_handle.reads()), reads);
}

/// 读数会一直阻塞，直到发送端被丢弃
struct StuckInput(crossbeam_channel::Receiver<()>);

impl green_hal::DigitalInput for StuckInput {
    fn read(&mut self) -> Result<bool, HalError> {
        let _ = self.0.recv();
        Ok(false)
    }
}

#[test]
fn test_stale_heartbeat_is_starvation() {
    let (manager, clock) = setup(200);
    let (release, rx) = crossbeam_channel::bounded::<()>(0);
    manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::Top, StuckInput(rx)))
        .unwrap();

    clock.advance(Duration::from_millis(50));
    assert!(!manager.is_starved());

    clock.advance(Duration::from_millis(100));
    let health = manager.health();
    assert_eq!(health.len(), 1);
    assert!(health[0].starved);
    assert_eq!(health[0].status, ServiceStatus::Running);
    assert!(manager.is_starved());

    drop(release);
    manager.shutdown().unwrap();
}

/// 第一次读数立即返回 false；之后每次读数先通知 `entered`，再等放行信号，返回 true
struct GatedInput {
    baseline_done: bool,
    entered: crossbeam_channel::Sender<()>,
    gate: crossbeam_channel::Receiver<()>,
}

impl green_hal::DigitalInput for GatedInput {
    fn read(&mut self) -> Result<bool, HalError> {
        if !self.baseline_done {
            self.baseline_done = true;
            return Ok(false);
        }
        let _ = self.entered.try_send(());
        let _ = self.gate.recv();
        Ok(true)
    }
}

#[test]
fn test_slow_thread_stays_live_until_joined() {
    let clock = Arc::new(ManualClock::new());
    let manager = SensorManager::new(
        ManagerConfig {
            poll_interval: Duration::from_millis(1),
            join_timeout: Duration::from_millis(20),
            ..ManagerConfig::default()
        },
        clock,
    );
    let (entered_tx, entered) = crossbeam_channel::bounded::<()>(1);
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    let input = GatedInput {
        baseline_done: false,
        entered: entered_tx,
        gate,
    };
    let id = manager
        .add_service(ServiceSpec::new(ServiceKind::BreakBeam).with_input(SensorId::Top, input))
        .unwrap();

    // 线程阻塞在第二次读数中
    entered.recv_timeout(Duration::from_secs(2)).unwrap();

    let err = manager.remove_service(id).unwrap_err();
    assert!(matches!(err, SensorError::JoinTimeout(timed_out) if timed_out == id));
    assert_eq!(manager.service_count(), 1);
    let health = manager.health();
    assert_eq!(health[0].status, ServiceStatus::Stopping);
    assert!(!health[0].is_healthy());

    // 放行后线程发布最后一次跳变并退出，再次移除成功
    release.send(()).unwrap();
    assert!(wait_until(|| manager.remove_service(id).is_ok()));
    assert_eq!(manager.service_count(), 0);

    let blocked = manager.get(ReportKind::Blocked);
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].sensor, SensorId::Top);
}
