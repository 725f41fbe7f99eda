//! 位置同步引擎
//!
//! 闭环遥操作开始前，拖动臂（leader）与随动臂（follower）几乎必然相距
//! 甚远；直接转发 leader 位姿会命令一次危险的大跳变。引擎分两段收敛：
//!
//! 1. **接近门**：操作员节奏的等待循环，直到两臂位姿最大关节差低于
//!    门限。无尝试次数上限，但必须可被取消。
//! 2. **增量收敛**：有限轮次的小步逼近，每子步的命令增量按最大分量
//!    等比钳位，保持方向。轮末校验全部关节差的**绝对值**低于同步阈值。
//!
//! 收敛轮次耗尽是硬性失败：会话不得进入接合状态。

use crate::arm::{ArmError, ArmInterface};
use crate::joint::JointVector;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// 同步引擎参数
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// 接近门阈值（弧度）：超过即拒绝开始收敛
    pub gate_threshold: f64,
    /// 收敛判定阈值（弧度）：轮末所有关节差的绝对值须低于此值
    pub sync_threshold: f64,
    /// 单子步最大关节增量（弧度）
    pub max_step: f64,
    /// 每轮子步数
    pub sub_steps: u32,
    /// 最大收敛轮次
    pub max_attempts: u32,
    /// 子步间隔
    pub step_period: Duration,
    /// 接近门轮询间隔
    pub gate_poll_period: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gate_threshold: 0.8,
            sync_threshold: 0.5,
            max_step: 0.05,
            sub_steps: 25,
            max_attempts: 5,
            step_period: Duration::from_millis(10),
            gate_poll_period: Duration::from_millis(100),
        }
    }
}

/// 同步错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 向量长度不一致：配置级错误，立即失败不重试
    #[error("Joint vector length mismatch: leader {leader}, follower {follower}")]
    LengthMismatch { leader: usize, follower: usize },

    /// 收敛轮次耗尽：会话级失败，需操作员介入
    #[error("Synchronization not achieved after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// 外部取消（关停信号）
    #[error("Synchronization cancelled")]
    Cancelled,

    /// 臂接口错误
    #[error("Arm error: {0}")]
    Arm(#[from] ArmError),
}

/// 接近门检查结果
///
/// 未通过不是错误，而是持续存在的前置条件未满足
/// （操作员仍在把拖动臂挪近）。
#[derive(Debug, Clone, PartialEq)]
pub struct GateStatus {
    /// 最大关节差的绝对值
    pub max_delta: f64,
    /// 超过门限的关节：（下标，leader，follower，差的绝对值）
    pub offending: SmallVec<[(usize, f64, f64, f64); 8]>,
}

impl GateStatus {
    pub fn passed(&self) -> bool {
        self.offending.is_empty()
    }
}

/// 位置同步引擎
pub struct SyncEngine {
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 单次接近门检查
    pub fn check_gate(
        &self,
        leader: &JointVector,
        follower: &JointVector,
    ) -> Result<GateStatus, SyncError> {
        check_lengths(leader, follower)?;

        let mut offending = SmallVec::new();
        let mut max_delta: f64 = 0.0;
        for (i, (l, f)) in leader
            .as_slice()
            .iter()
            .zip(follower.as_slice().iter())
            .enumerate()
        {
            let delta = (l - f).abs();
            max_delta = max_delta.max(delta);
            if delta >= self.config.gate_threshold {
                offending.push((i, *l, *f, delta));
            }
        }
        Ok(GateStatus { max_delta, offending })
    }

    /// 等待接近门通过
    ///
    /// 操作员节奏：无次数上限，每次迭代检查取消标志；
    /// 未满足时以约 1Hz 的频率上报超限关节。
    pub fn wait_for_gate<L, F>(
        &self,
        leader: &mut L,
        follower: &mut F,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), SyncError>
    where
        L: ArmInterface + ?Sized,
        F: ArmInterface + ?Sized,
    {
        let mut last_report: Option<Instant> = None;
        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(SyncError::Cancelled);
            }

            let leader_pose = leader.joint_positions()?;
            let follower_pose = follower.joint_positions()?;
            let status = self.check_gate(&leader_pose, &follower_pose)?;
            if status.passed() {
                info!("Proximity gate passed (max delta {:.3} rad)", status.max_delta);
                return Ok(());
            }

            // 低频上报，给操作员留出挪动拖动臂的时间
            let should_report = last_report
                .map(|t| t.elapsed() >= Duration::from_secs(1))
                .unwrap_or(true);
            if should_report {
                for (i, l, f, delta) in &status.offending {
                    info!(
                        "joint[{}]: delta {:.3}, leader {:.3}, follower {:.3}",
                        i, delta, l, f
                    );
                }
                last_report = Some(Instant::now());
            }

            std::thread::sleep(self.config.gate_poll_period);
        }
    }

    /// 增量收敛
    ///
    /// 最多 `max_attempts` 轮，每轮 `sub_steps` 个钳位子步；
    /// 轮末重新采样并要求所有 |leader − follower| 低于同步阈值。
    pub fn converge<L, F>(
        &self,
        leader: &mut L,
        follower: &mut F,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), SyncError>
    where
        L: ArmInterface + ?Sized,
        F: ArmInterface + ?Sized,
    {
        let sleeper = spin_sleep::SpinSleeper::default();

        for attempt in 1..=self.config.max_attempts {
            info!(
                "Synchronization attempt {}/{}",
                attempt, self.config.max_attempts
            );

            for _ in 0..self.config.sub_steps {
                if cancel.load(Ordering::Acquire) {
                    return Err(SyncError::Cancelled);
                }

                let leader_pose = leader.joint_positions()?;
                let follower_pose = follower.joint_positions()?;
                check_lengths(&leader_pose, &follower_pose)?;

                let step = leader_pose
                    .delta(&follower_pose)
                    .clamped_step(self.config.max_step);
                follower.command_joints(&follower_pose.add(&step))?;

                sleeper.sleep(self.config.step_period);
            }

            // === 轮末校验：一律取绝对值 ===
            // （负向超限的关节差同样判为未收敛）
            let leader_pose = leader.joint_positions()?;
            let follower_pose = follower.joint_positions()?;
            let diff = leader_pose.delta(&follower_pose);

            let offending: Vec<usize> = diff
                .as_slice()
                .iter()
                .enumerate()
                .filter(|(_, d)| d.abs() >= self.config.sync_threshold)
                .map(|(i, _)| i)
                .collect();

            if offending.is_empty() {
                info!(
                    "Synchronization successful after {} attempt(s), max residual {:.3} rad",
                    attempt,
                    diff.max_abs().1
                );
                return Ok(());
            }

            for &i in &offending {
                warn!(
                    "joint[{}] not synchronized: leader {:.4}, follower {:.4}, diff {:.4}",
                    i, leader_pose[i], follower_pose[i], diff[i]
                );
            }
        }

        Err(SyncError::Exhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// 完整同步流程：接近门 + 增量收敛
    pub fn synchronize<L, F>(
        &self,
        leader: &mut L,
        follower: &mut F,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), SyncError>
    where
        L: ArmInterface + ?Sized,
        F: ArmInterface + ?Sized,
    {
        self.wait_for_gate(leader, follower, cancel)?;
        self.converge(leader, follower, cancel)
    }
}

fn check_lengths(leader: &JointVector, follower: &JointVector) -> Result<(), SyncError> {
    if leader.len() != follower.len() {
        return Err(SyncError::LengthMismatch {
            leader: leader.len(),
            follower: follower.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::MockArm;

    fn fast_config() -> SyncConfig {
        SyncConfig {
            step_period: Duration::ZERO,
            gate_poll_period: Duration::from_millis(1),
            ..SyncConfig::default()
        }
    }

    fn cancel_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_gate_rejects_distant_poses() {
        // leader [0;6] vs follower [1;6]：max delta 1.0 >= 0.8 → 不通过
        let engine = SyncEngine::new(fast_config());
        let leader = JointVector::zeros(6);
        let follower = JointVector::from_slice(&[1.0; 6]);

        let status = engine.check_gate(&leader, &follower).unwrap();
        assert!(!status.passed());
        assert_eq!(status.max_delta, 1.0);
        assert_eq!(status.offending.len(), 6);
    }

    #[test]
    fn test_gate_passes_close_poses() {
        // follower 挪到 [0.5;6]：delta 0.5 < 0.8 → 通过
        let engine = SyncEngine::new(fast_config());
        let leader = JointVector::zeros(6);
        let follower = JointVector::from_slice(&[0.5; 6]);

        let status = engine.check_gate(&leader, &follower).unwrap();
        assert!(status.passed());
        assert_eq!(status.max_delta, 0.5);
    }

    #[test]
    fn test_gate_length_mismatch_is_immediate_error() {
        let engine = SyncEngine::new(fast_config());
        let leader = JointVector::zeros(7);
        let follower = JointVector::zeros(6);
        assert!(matches!(
            engine.check_gate(&leader, &follower),
            Err(SyncError::LengthMismatch { leader: 7, follower: 6 })
        ));
    }

    #[test]
    fn test_responsive_follower_converges_within_budget() {
        let engine = SyncEngine::new(fast_config());
        let mut leader = MockArm::frozen(JointVector::from_slice(&[0.5; 6]));
        let mut follower = MockArm::responsive(JointVector::zeros(6));

        engine
            .synchronize(&mut leader, &mut follower, &cancel_flag())
            .unwrap();

        // 每子步最多 0.05，25 步足以走完 0.5
        let residual = leader
            .joint_positions()
            .unwrap()
            .delta(&follower.joint_positions().unwrap());
        assert!(residual.max_abs().1 < 0.5);
    }

    #[test]
    fn test_frozen_follower_exhausts_all_attempts() {
        let engine = SyncEngine::new(fast_config());
        let mut leader = MockArm::frozen(JointVector::from_slice(&[0.6; 6]));
        let mut follower = MockArm::frozen(JointVector::zeros(6));

        // 0.6 < 0.8：门通过；follower 不动 → 5 轮后耗尽
        let err = engine
            .synchronize(&mut leader, &mut follower, &cancel_flag())
            .unwrap_err();
        assert!(matches!(err, SyncError::Exhausted { attempts: 5 }));
        // 5 轮 × 25 子步，每子步一条命令
        assert_eq!(follower.commands_received, 125);
    }

    #[test]
    fn test_negative_residual_also_fails_convergence() {
        // follower 在 leader 之上 0.6 rad：差值为负，绝对值判定同样未收敛
        let engine = SyncEngine::new(fast_config());
        let mut leader = MockArm::frozen(JointVector::zeros(6));
        let mut follower = MockArm::frozen(JointVector::from_slice(&[0.6; 6]));

        let err = engine
            .synchronize(&mut leader, &mut follower, &cancel_flag())
            .unwrap_err();
        assert!(matches!(err, SyncError::Exhausted { attempts: 5 }));
    }

    #[test]
    fn test_substep_commands_are_clamped() {
        let engine = SyncEngine::new(fast_config());
        let mut leader = MockArm::frozen(JointVector::from_slice(&[0.5; 6]));
        let mut follower = MockArm::frozen(JointVector::zeros(6));

        let _ = engine.converge(&mut leader, &mut follower, &cancel_flag());

        // follower 冻结在零位：每条命令都是从零位出发的单步，最大分量 0.05
        let last = follower.last_command.as_ref().unwrap();
        assert!((last.max_abs().1 - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_gate_wait_is_cancellable() {
        let engine = SyncEngine::new(fast_config());
        let mut leader = MockArm::frozen(JointVector::zeros(6));
        let mut follower = MockArm::frozen(JointVector::from_slice(&[2.0; 6]));

        // 门永远不会通过；预先置位取消标志
        let cancel = cancel_flag();
        cancel.store(true, Ordering::Release);

        let err = engine
            .synchronize(&mut leader, &mut follower, &cancel)
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(follower.commands_received, 0);
    }
}
