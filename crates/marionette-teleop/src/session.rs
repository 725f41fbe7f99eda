//! 会话控制器与固定节拍控制循环
//!
//! 顶层状态机：`Uncalibrated → Calibrating → Idle ⇄ Engaged`。
//! 单一逻辑控制线程驱动固定节拍 tick 循环，是会话状态与标定会话的
//! 唯一写者。每个 tick：采样踏板 → 状态机推进 → 视状态转发 leader
//! 位姿或什么都不做。
//!
//! 所有 IO 调用同步阻塞；tick 周期 = 阻塞调用耗时 + 补足到目标节拍的
//! 睡眠。阻塞超出 tick 预算时循环只是变慢（记录滑移，不做超限处理）。

use crate::arm::{ArmError, ArmInterface};
use crate::pedal::{PedalConfig, PedalEvent, PedalMonitor, PedalSource};
use crate::sync::{SyncEngine, SyncError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 会话状态
///
/// 是否向随动臂转发命令的唯一事实来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 未标定：双击踏板触发标定
    Uncalibrated,
    /// 标定中：接近门 + 增量收敛
    Calibrating,
    /// 已标定、未接合：踩住踏板开始遥操作
    Idle,
    /// 接合：每 tick 转发 leader 位姿
    Engaged,
}

/// 操作员状态显示（事件汇，不约定渲染方式）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// "ready for calibration"
    ReadyForCalibration,
    /// "teleoperation active"
    TeleopActive,
    /// "ready"
    Ready,
}

/// 状态显示汇
pub trait StatusSink: Send {
    fn status_changed(&mut self, status: SessionStatus);
}

/// 丢弃所有状态更新
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn status_changed(&mut self, _status: SessionStatus) {}
}

/// 会话结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// 关停信号触发的干净退出
    Interrupted,
    /// 达到 tick 上限（测试/定时运行）
    Completed,
}

/// 会话级错误
#[derive(Error, Debug)]
pub enum SessionError {
    /// 同步失败（标定耗尽或长度不匹配）
    #[error("Synchronization failed: {0}")]
    Sync(#[from] SyncError),

    /// 臂接口错误（含夹爪链路丢失）
    #[error("Arm error: {0}")]
    Arm(#[from] ArmError),
}

/// 控制循环配置
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// 控制频率（Hz），默认 100
    pub rate_hz: f64,
    /// 最大 tick 数（None 表示无限循环；测试/定时运行用）
    pub max_ticks: Option<u64>,
    /// 标定耗尽时终止会话（否则回到未标定状态等待重新双击）
    pub abort_on_sync_exhaustion: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: 100.0,
            max_ticks: None,
            abort_on_sync_exhaustion: true,
        }
    }
}

/// 每 N tick 输出一次滑移统计
const SLIP_REPORT_INTERVAL: u64 = 1000;

/// 会话控制器
pub struct SessionController {
    leader: Box<dyn ArmInterface>,
    follower: Box<dyn ArmInterface>,
    pedal: Box<dyn PedalSource>,
    status_sink: Box<dyn StatusSink>,
    monitor: PedalMonitor,
    sync: SyncEngine,
    config: LoopConfig,
    state: SessionState,
}

impl SessionController {
    pub fn new(
        leader: impl ArmInterface + 'static,
        follower: impl ArmInterface + 'static,
        pedal: impl PedalSource + 'static,
        status_sink: impl StatusSink + 'static,
        pedal_config: PedalConfig,
        sync: SyncEngine,
        config: LoopConfig,
    ) -> Self {
        Self {
            leader: Box::new(leader),
            follower: Box::new(follower),
            pedal: Box::new(pedal),
            status_sink: Box::new(status_sink),
            monitor: PedalMonitor::new(pedal_config),
            sync,
            config,
            state: SessionState::Uncalibrated,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 运行控制循环直到关停、出错或达到 tick 上限
    ///
    /// 这是唯一写 `SessionState` 的线程；关停标志在每个 tick 之间
    /// 以及接近门循环内部被检查。
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<SessionOutcome, SessionError> {
        if self.config.rate_hz <= 0.0 {
            warn!("Invalid rate_hz {}, falling back to 100 Hz", self.config.rate_hz);
            self.config.rate_hz = 100.0;
        }
        let period = Duration::from_secs_f64(1.0 / self.config.rate_hz);
        let sleeper = spin_sleep::SpinSleeper::default();

        #[cfg(feature = "realtime")]
        {
            use thread_priority::{ThreadPriority, set_current_thread_priority};
            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => info!("Control thread priority set to MAX (realtime)"),
                Err(e) => warn!("Failed to set control thread priority: {:?}", e),
            }
        }

        info!(
            "Control loop starting at {} Hz ({} DOF)",
            self.config.rate_hz,
            self.follower.dof()
        );
        self.status_sink
            .status_changed(SessionStatus::ReadyForCalibration);

        let mut ticks: u64 = 0;
        let mut slipped_ticks: u64 = 0;

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Shutdown requested, leaving control loop");
                return Ok(SessionOutcome::Interrupted);
            }
            if let Some(max) = self.config.max_ticks
                && ticks >= max
            {
                return Ok(SessionOutcome::Completed);
            }

            let tick_start = Instant::now();

            // === 1. 踏板采样与事件推进 ===
            let pressed = self.pedal.is_pressed();
            let events = self.monitor.sample(pressed, tick_start);
            for event in events {
                match self.handle_event(event, &shutdown)? {
                    Some(outcome) => return Ok(outcome),
                    None => {},
                }
            }

            // === 2. 接合/脱开按电平判定（已标定时踩住即接合） ===
            if pressed && self.state == SessionState::Idle {
                info!("Teleoperation started");
                self.state = SessionState::Engaged;
                self.status_sink.status_changed(SessionStatus::TeleopActive);
            } else if !pressed && self.state == SessionState::Engaged {
                info!("Teleoperation stopped");
                self.state = SessionState::Idle;
                self.status_sink.status_changed(SessionStatus::Ready);
            }

            // === 3. 控制 tick：接合时原样转发 leader 位姿 ===
            // 瞬态执行器故障降级会话（要求重新标定）；
            // 只有链路丢失才终止循环
            if self.state == SessionState::Engaged {
                match self.forward_leader_pose() {
                    Ok(()) => {},
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!("Arm fault while engaged: {}, calibration invalidated", e);
                        self.state = SessionState::Uncalibrated;
                        self.status_sink
                            .status_changed(SessionStatus::ReadyForCalibration);
                    },
                }
            }

            ticks += 1;

            // === 4. 节拍补足与滑移统计 ===
            let elapsed = tick_start.elapsed();
            if elapsed >= period {
                slipped_ticks += 1;
            } else {
                sleeper.sleep(period - elapsed);
            }
            if ticks % SLIP_REPORT_INTERVAL == 0 && slipped_ticks > 0 {
                debug!(
                    "Tick slip: {}/{} ticks exceeded the {:?} budget",
                    slipped_ticks, SLIP_REPORT_INTERVAL, period
                );
                slipped_ticks = 0;
            }
        }
    }

    /// 处理单个踏板事件；返回 `Some` 表示会话应结束
    fn handle_event(
        &mut self,
        event: PedalEvent,
        shutdown: &Arc<AtomicBool>,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        match event {
            PedalEvent::DoublePressed if self.state == SessionState::Uncalibrated => {
                self.calibrate(shutdown)
            },
            PedalEvent::IdleTimeout
                if matches!(self.state, SessionState::Idle | SessionState::Engaged) =>
            {
                info!("Calibration reset: double press the pedal to recalibrate");
                self.state = SessionState::Uncalibrated;
                self.status_sink
                    .status_changed(SessionStatus::ReadyForCalibration);
                Ok(None)
            },
            _ => {
                debug!("Pedal event {:?} in state {:?}", event, self.state);
                Ok(None)
            },
        }
    }

    /// 标定流程：接近门 + 增量收敛
    fn calibrate(
        &mut self,
        shutdown: &Arc<AtomicBool>,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        info!("Calibrating: moving follower toward leader position");
        self.state = SessionState::Calibrating;

        let result =
            self.sync
                .synchronize(self.leader.as_mut(), self.follower.as_mut(), shutdown);

        match result {
            Ok(()) => {
                info!("Calibration complete");
                self.state = SessionState::Idle;
                self.status_sink.status_changed(SessionStatus::Ready);
                // 标定本身视作踏板活动，避免长标定流逝的时间立即触发空闲超时
                self.monitor.touch(Instant::now());
                Ok(None)
            },
            Err(SyncError::Exhausted { attempts }) => {
                warn!("Could not complete synchronization after {} attempts", attempts);
                self.state = SessionState::Uncalibrated;
                self.status_sink
                    .status_changed(SessionStatus::ReadyForCalibration);
                if self.config.abort_on_sync_exhaustion {
                    Err(SessionError::Sync(SyncError::Exhausted { attempts }))
                } else {
                    Ok(None)
                }
            },
            Err(SyncError::Cancelled) => {
                info!("Calibration cancelled by shutdown");
                self.state = SessionState::Uncalibrated;
                Ok(Some(SessionOutcome::Interrupted))
            },
            Err(SyncError::Arm(e)) if !e.is_fatal() => {
                warn!("Arm fault during calibration: {}", e);
                self.state = SessionState::Uncalibrated;
                self.status_sink
                    .status_changed(SessionStatus::ReadyForCalibration);
                Ok(None)
            },
            // 长度不匹配与链路丢失：配置/硬件级，直接上抛
            Err(e) => {
                self.state = SessionState::Uncalibrated;
                Err(e.into())
            },
        }
    }

    fn forward_leader_pose(&mut self) -> Result<(), ArmError> {
        let pose = self.leader.joint_positions()?;
        self.follower.command_joints(&pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::MockArm;
    use crate::joint::JointVector;
    use crate::pedal::ScriptedPedal;
    use crate::sync::SyncConfig;
    use parking_lot::Mutex;

    /// 收集状态更新的汇
    #[derive(Clone, Default)]
    struct CollectingSink(Arc<Mutex<Vec<SessionStatus>>>);

    impl StatusSink for CollectingSink {
        fn status_changed(&mut self, status: SessionStatus) {
            self.0.lock().push(status);
        }
    }

    fn fast_sync() -> SyncEngine {
        SyncEngine::new(SyncConfig {
            step_period: Duration::ZERO,
            gate_poll_period: Duration::from_millis(1),
            ..SyncConfig::default()
        })
    }

    fn fast_loop(max_ticks: u64) -> LoopConfig {
        LoopConfig {
            rate_hz: 2000.0,
            max_ticks: Some(max_ticks),
            abort_on_sync_exhaustion: true,
        }
    }

    #[test]
    fn test_double_press_calibrates_then_hold_engages() {
        let leader = Arc::new(Mutex::new(MockArm::frozen(JointVector::from_slice(&[0.3; 6]))));
        let follower = Arc::new(Mutex::new(MockArm::responsive(JointVector::zeros(6))));
        let sink = CollectingSink::default();
        let statuses = sink.0.clone();

        // 双击（两次按下间隔 2 tick << 0.5s），随后持续踩住到会话结束
        let script = [true, false, true, true, true, true, true, true];
        let mut session = SessionController::new(
            leader.clone(),
            follower.clone(),
            ScriptedPedal::new(script),
            sink,
            PedalConfig::default(),
            fast_sync(),
            fast_loop(8),
        );

        let outcome = session.run(Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);

        // 接合期间 leader 位姿被原样转发
        let last = follower.lock().last_command.clone().unwrap();
        assert_eq!(last, JointVector::from_slice(&[0.3; 6]));

        let seen = statuses.lock().clone();
        assert_eq!(
            seen,
            vec![
                SessionStatus::ReadyForCalibration,
                SessionStatus::Ready,
                SessionStatus::TeleopActive,
            ]
        );
    }

    #[test]
    fn test_release_disengages_back_to_idle() {
        let leader = MockArm::frozen(JointVector::from_slice(&[0.2; 6]));
        let follower = MockArm::responsive(JointVector::zeros(6));
        let sink = CollectingSink::default();
        let statuses = sink.0.clone();

        // 双击标定 → 踩住接合 → 松开脱开
        let script = [true, false, true, true, true, false, false];
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new(script),
            sink,
            PedalConfig::default(),
            fast_sync(),
            fast_loop(10),
        );

        session.run(Arc::new(AtomicBool::new(false))).unwrap();
        let seen = statuses.lock().clone();
        assert_eq!(
            seen,
            vec![
                SessionStatus::ReadyForCalibration,
                SessionStatus::Ready,
                SessionStatus::TeleopActive,
                SessionStatus::Ready,
            ]
        );
    }

    #[test]
    fn test_idle_timeout_invalidates_calibration() {
        let leader = MockArm::frozen(JointVector::from_slice(&[0.2; 6]));
        let follower = MockArm::responsive(JointVector::zeros(6));
        let sink = CollectingSink::default();
        let statuses = sink.0.clone();

        // 双击标定后不再踩踏板；空闲窗口缩短到 5ms
        let script = [true, false, true];
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new(script),
            sink,
            PedalConfig {
                idle_timeout: Duration::from_millis(5),
                ..PedalConfig::default()
            },
            fast_sync(),
            fast_loop(100),
        );

        session.run(Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(session.state(), SessionState::Uncalibrated);
        assert_eq!(
            statuses.lock().last(),
            Some(&SessionStatus::ReadyForCalibration)
        );
    }

    #[test]
    fn test_sync_exhaustion_aborts_session() {
        // follower 冻结且相距 0.6 rad：门通过但永不收敛
        let leader = MockArm::frozen(JointVector::from_slice(&[0.6; 6]));
        let follower = MockArm::frozen(JointVector::zeros(6));

        let script = [true, false, true];
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new(script),
            NullStatusSink,
            PedalConfig::default(),
            fast_sync(),
            fast_loop(10),
        );

        let err = session.run(Arc::new(AtomicBool::new(false))).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Sync(SyncError::Exhausted { attempts: 5 })
        ));
        assert_eq!(session.state(), SessionState::Uncalibrated);
    }

    #[test]
    fn test_sync_exhaustion_downgrades_without_abort() {
        let leader = MockArm::frozen(JointVector::from_slice(&[0.6; 6]));
        let follower = MockArm::frozen(JointVector::zeros(6));

        let script = [true, false, true, true, true];
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new(script),
            NullStatusSink,
            PedalConfig::default(),
            fast_sync(),
            LoopConfig {
                abort_on_sync_exhaustion: false,
                ..fast_loop(8)
            },
        );

        // 不终止：回到未标定状态，等待重新双击
        let outcome = session.run(Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(session.state(), SessionState::Uncalibrated);
    }

    /// 前 `fail_after` 条命令成功，之后每条命令报执行器超时（瞬态故障）
    struct FaultyFollower {
        inner: MockArm,
        fail_after: usize,
    }

    impl crate::arm::ArmInterface for FaultyFollower {
        fn dof(&self) -> usize {
            self.inner.dof()
        }

        fn joint_positions(&mut self) -> Result<JointVector, crate::arm::ArmError> {
            self.inner.joint_positions()
        }

        fn command_joints(&mut self, target: &JointVector) -> Result<(), crate::arm::ArmError> {
            if self.inner.commands_received >= self.fail_after {
                return Err(crate::arm::ArmError::Gripper(
                    marionette_gripper::GripperError::ActuationTimeout { polls: 3 },
                ));
            }
            self.inner.command_joints(target)
        }
    }

    #[test]
    fn test_transient_arm_fault_downgrades_instead_of_crashing() {
        let leader = MockArm::frozen(JointVector::from_slice(&[0.2; 6]));
        // 标定的 25 个子步命令成功；接合后的第一条转发命令故障
        let follower = FaultyFollower {
            inner: MockArm::responsive(JointVector::zeros(6)),
            fail_after: 25,
        };

        let script = [true, false, true, true, true];
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new(script),
            NullStatusSink,
            PedalConfig::default(),
            fast_sync(),
            fast_loop(8),
        );

        // 瞬态故障不终止循环：会话降级到未标定并继续运行
        let outcome = session.run(Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(session.state(), SessionState::Uncalibrated);
    }

    #[test]
    fn test_shutdown_interrupts_promptly() {
        let leader = MockArm::frozen(JointVector::zeros(6));
        let follower = MockArm::responsive(JointVector::zeros(6));

        let shutdown = Arc::new(AtomicBool::new(true));
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new([]),
            NullStatusSink,
            PedalConfig::default(),
            fast_sync(),
            fast_loop(1_000_000),
        );

        let outcome = session.run(shutdown).unwrap();
        assert_eq!(outcome, SessionOutcome::Interrupted);
    }

    #[test]
    fn test_length_mismatch_is_fatal() {
        // leader 7 槽位、follower 6 槽位：配置错误，立即失败
        let leader = MockArm::frozen(JointVector::zeros(7));
        let follower = MockArm::responsive(JointVector::zeros(6));

        let script = [true, false, true];
        let mut session = SessionController::new(
            leader,
            follower,
            ScriptedPedal::new(script),
            NullStatusSink,
            PedalConfig::default(),
            fast_sync(),
            fast_loop(10),
        );

        let err = session.run(Arc::new(AtomicBool::new(false))).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Sync(SyncError::LengthMismatch { .. })
        ));
    }
}
