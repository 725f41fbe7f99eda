//! 机械臂接口边界
//!
//! 厂商伺服控制器是外部协作者：本层只消费"命令关节向量、读取关节向量"
//! 两个能力，每个厂商一个具体适配器，核心不依赖适配器内部。
//!
//! [`GrippedArm`] 把 6 自由度臂适配器与夹爪组合成 7 槽位接口
//! （末位 = 夹爪归一化开合）。

use crate::joint::JointVector;
use marionette_gripper::{Gripper, GripperError, OPEN_THRESHOLD};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// 机械臂边界错误
#[derive(Error, Debug)]
pub enum ArmError {
    /// 夹爪错误
    #[error("Gripper error: {0}")]
    Gripper(#[from] GripperError),

    /// 厂商适配器错误
    #[error("Arm adapter error: {0}")]
    Adapter(String),
}

impl ArmError {
    /// 是否为不可恢复故障（硬件链路丢失），会话无法降级处理
    pub fn is_fatal(&self) -> bool {
        match self {
            ArmError::Gripper(e) => e.is_link_lost(),
            ArmError::Adapter(_) => true,
        }
    }
}

/// 机械臂能力接口
///
/// 两个操作均同步阻塞。实现方保证返回向量长度恒等于 `dof()`。
pub trait ArmInterface: Send {
    /// 关节数（含夹爪槽位，若有）
    fn dof(&self) -> usize;

    /// 采样当前关节向量
    fn joint_positions(&mut self) -> Result<JointVector, ArmError>;

    /// 命令下一个关节向量目标
    fn command_joints(&mut self, target: &JointVector) -> Result<(), ArmError>;
}

impl<A: ArmInterface + ?Sized> ArmInterface for Box<A> {
    fn dof(&self) -> usize {
        (**self).dof()
    }

    fn joint_positions(&mut self) -> Result<JointVector, ArmError> {
        (**self).joint_positions()
    }

    fn command_joints(&mut self, target: &JointVector) -> Result<(), ArmError> {
        (**self).command_joints(target)
    }
}

/// 共享句柄也可作为臂接口（测试与监控路径用）
impl<A: ArmInterface> ArmInterface for Arc<parking_lot::Mutex<A>> {
    fn dof(&self) -> usize {
        self.lock().dof()
    }

    fn joint_positions(&mut self) -> Result<JointVector, ArmError> {
        self.lock().joint_positions()
    }

    fn command_joints(&mut self, target: &JointVector) -> Result<(), ArmError> {
        self.lock().command_joints(target)
    }
}

/// 带夹爪的随动臂
///
/// 命令向量的前 N 位转发给臂适配器；夹爪槽位在 0.5 处离散化：
/// 低于阈值且当前张开 → 闭合，高于阈值且当前闭合 → 张开到配置的
/// 张开位置。开合状态由最近一次夹爪指令推导，不读硬件。
pub struct GrippedArm<A, G> {
    arm: A,
    gripper: G,
    /// 张开指令的目标位置（满行程的比例）
    open_position: f64,
}

impl<A: ArmInterface, G: Gripper> GrippedArm<A, G> {
    pub fn new(arm: A, gripper: G, open_position: f64) -> Self {
        Self {
            arm,
            gripper,
            open_position,
        }
    }

    pub fn gripper(&self) -> &G {
        &self.gripper
    }
}

impl<A: ArmInterface, G: Gripper> ArmInterface for GrippedArm<A, G> {
    fn dof(&self) -> usize {
        self.arm.dof() + 1
    }

    fn joint_positions(&mut self) -> Result<JointVector, ArmError> {
        let mut pose = self.arm.joint_positions()?;
        pose.push(self.gripper.read_position()?);
        Ok(pose)
    }

    fn command_joints(&mut self, target: &JointVector) -> Result<(), ArmError> {
        let arm_dof = self.arm.dof();
        let arm_target = JointVector::from_slice(&target.as_slice()[..arm_dof]);
        self.arm.command_joints(&arm_target)?;

        // 夹爪槽位离散化为开/合指令
        let grip_target = target[target.len() - 1];
        let state = self.gripper.state();
        if grip_target < OPEN_THRESHOLD && state.is_open {
            debug!("Gripper slot {:.2} -> close", grip_target);
            self.gripper.move_to(0.0)?;
        } else if grip_target > OPEN_THRESHOLD && !state.is_open {
            debug!("Gripper slot {:.2} -> open", grip_target);
            self.gripper.move_to(self.open_position)?;
        }
        Ok(())
    }
}

/// 仿真臂
///
/// 响应模式下每条命令立即到位；冻结模式下忽略所有命令。
/// 供测试与无硬件试运行使用。
pub struct MockArm {
    position: JointVector,
    responsive: bool,
    /// 收到的命令计数
    pub commands_received: usize,
    /// 最近一条命令
    pub last_command: Option<JointVector>,
}

impl MockArm {
    /// 响应式仿真臂：命令即到位
    pub fn responsive(initial: JointVector) -> Self {
        Self {
            position: initial,
            responsive: true,
            commands_received: 0,
            last_command: None,
        }
    }

    /// 冻结仿真臂：忽略命令，位置不变
    pub fn frozen(initial: JointVector) -> Self {
        Self {
            position: initial,
            responsive: false,
            commands_received: 0,
            last_command: None,
        }
    }

    /// 直接搬动（模拟操作员移动拖动臂）
    pub fn set_position(&mut self, position: JointVector) {
        self.position = position;
    }
}

impl ArmInterface for MockArm {
    fn dof(&self) -> usize {
        self.position.len()
    }

    fn joint_positions(&mut self) -> Result<JointVector, ArmError> {
        Ok(self.position.clone())
    }

    fn command_joints(&mut self, target: &JointVector) -> Result<(), ArmError> {
        self.commands_received += 1;
        self.last_command = Some(target.clone());
        if self.responsive {
            self.position = target.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_gripper::GripperState;
    use parking_lot::Mutex;

    /// 记录调用的仿真夹爪
    struct RecordingGripper {
        state: Mutex<GripperState>,
        moves: Mutex<Vec<f64>>,
    }

    impl RecordingGripper {
        fn new() -> Self {
            Self {
                state: Mutex::new(GripperState::default()),
                moves: Mutex::new(Vec::new()),
            }
        }
    }

    impl Gripper for RecordingGripper {
        fn initialize(&self) -> Result<(), GripperError> {
            Ok(())
        }

        fn move_to(&self, position: f64) -> Result<(), GripperError> {
            self.moves.lock().push(position);
            let mut state = self.state.lock();
            state.position = position;
            state.is_open = position >= OPEN_THRESHOLD;
            Ok(())
        }

        fn move_to_blocking(&self, position: f64) -> Result<(), GripperError> {
            self.move_to(position)
        }

        fn read_position(&self) -> Result<f64, GripperError> {
            Ok(self.state.lock().position)
        }

        fn set_force(&self, _pct: u16) -> Result<(), GripperError> {
            Ok(())
        }

        fn set_speed(&self, _pct: u16) -> Result<(), GripperError> {
            Ok(())
        }

        fn state(&self) -> GripperState {
            *self.state.lock()
        }
    }

    #[test]
    fn test_gripped_arm_appends_gripper_slot() {
        let arm = MockArm::responsive(JointVector::zeros(6));
        let mut gripped = GrippedArm::new(arm, RecordingGripper::new(), 0.7);

        assert_eq!(gripped.dof(), 7);
        let pose = gripped.joint_positions().unwrap();
        assert_eq!(pose.len(), 7);
        assert_eq!(pose[6], 0.0);
    }

    #[test]
    fn test_gripper_slot_thresholded_into_discrete_commands() {
        let arm = MockArm::responsive(JointVector::zeros(6));
        let mut gripped = GrippedArm::new(arm, RecordingGripper::new(), 0.7);

        // 闭合状态 + 槽位 0.9 → 张开到 0.7
        let mut target = JointVector::zeros(6);
        target.push(0.9);
        gripped.command_joints(&target).unwrap();
        assert_eq!(*gripped.gripper().moves.lock(), vec![0.7]);

        // 已张开 + 槽位仍 > 0.5 → 不重复下发
        gripped.command_joints(&target).unwrap();
        assert_eq!(gripped.gripper().moves.lock().len(), 1);

        // 槽位 0.2 → 闭合
        let mut target = JointVector::zeros(6);
        target.push(0.2);
        gripped.command_joints(&target).unwrap();
        assert_eq!(*gripped.gripper().moves.lock(), vec![0.7, 0.0]);
    }

    #[test]
    fn test_mock_arm_frozen_ignores_commands() {
        let mut arm = MockArm::frozen(JointVector::from_slice(&[1.0; 6]));
        arm.command_joints(&JointVector::zeros(6)).unwrap();
        assert_eq!(arm.joint_positions().unwrap(), JointVector::from_slice(&[1.0; 6]));
        assert_eq!(arm.commands_received, 1);
    }
}
