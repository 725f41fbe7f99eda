//! 直驱变体
//!
//! 16 位行程目标（0 = 闭合，1000 = 张开），写位置寄存器即开始运动。
//! 初始化需要向激活寄存器写入魔数，然后轮询初始化状态寄存器直到就绪。

use crate::{Gripper, GripperError, GripperState, PollConfig, clamp_normalized};
use marionette_modbus::{ModbusClient, Transport};
use parking_lot::Mutex;
use tracing::{debug, info};

// ==================== 寄存器映射 ====================

/// 激活寄存器
const REG_ACTIVATE: u16 = 0x0100;
/// 力寄存器
const REG_FORCE: u16 = 0x0101;
/// 位置目标寄存器
const REG_POSITION: u16 = 0x0103;
/// 速度寄存器
const REG_SPEED: u16 = 0x0104;
/// 初始化状态寄存器（1 = 就绪）
const REG_INIT_STATE: u16 = 0x0200;
/// 夹持状态寄存器（非 0 = 运动完成）
const REG_GRIP_STATE: u16 = 0x0201;
/// 实际位置反馈寄存器
const REG_ACTUAL_POSITION: u16 = 0x0202;

/// 激活魔数
const ACTIVATE_MAGIC: u16 = 0x00A5;
/// 原生行程量程
const TRAVEL: f64 = 1000.0;

/// 直驱夹爪
///
/// 寄存器访问经由互斥锁串行化；状态轮询在两次事务之间释放锁，
/// 监控路径的位置读取可以插入其间。
pub struct DirectGripper<T> {
    client: Mutex<ModbusClient<T>>,
    state: Mutex<GripperState>,
    poll: PollConfig,
}

impl<T: Transport> DirectGripper<T> {
    pub fn new(client: ModbusClient<T>) -> Self {
        Self::with_poll_config(client, PollConfig::default())
    }

    pub fn with_poll_config(client: ModbusClient<T>, poll: PollConfig) -> Self {
        Self {
            client: Mutex::new(client),
            state: Mutex::new(GripperState::default()),
            poll,
        }
    }

    fn write_position_units(&self, position: f64) -> Result<(), GripperError> {
        let position = clamp_normalized(position);
        let units = (position * TRAVEL).round() as u16;
        self.client.lock().write_register(REG_POSITION, units)?;
        self.state.lock().record_command(position);
        debug!("Direct gripper commanded to {} units", units);
        Ok(())
    }

    /// 等待运动完成：轮询夹持状态寄存器直到非 0
    fn wait_for_motion(&self) -> Result<(), GripperError> {
        for _ in 0..self.poll.max_motion_polls {
            let grip_state = self.client.lock().read_register(REG_GRIP_STATE)?;
            if grip_state != 0 {
                return Ok(());
            }
            std::thread::sleep(self.poll.interval);
        }
        Err(GripperError::ActuationTimeout {
            polls: self.poll.max_motion_polls,
        })
    }
}

impl<T: Transport + Send> Gripper for DirectGripper<T> {
    fn initialize(&self) -> Result<(), GripperError> {
        self.client.lock().write_register(REG_ACTIVATE, ACTIVATE_MAGIC)?;

        // 轮询初始化状态直到就绪
        for _ in 0..self.poll.max_activation_polls {
            let init_state = self.client.lock().read_register(REG_INIT_STATE)?;
            if init_state == 1 {
                info!("Direct gripper activated");
                return Ok(());
            }
            std::thread::sleep(self.poll.interval);
        }
        Err(GripperError::ActivationTimeout {
            polls: self.poll.max_activation_polls,
        })
    }

    fn move_to(&self, position: f64) -> Result<(), GripperError> {
        self.write_position_units(position)
    }

    fn move_to_blocking(&self, position: f64) -> Result<(), GripperError> {
        self.write_position_units(position)?;
        self.wait_for_motion()
    }

    fn read_position(&self) -> Result<f64, GripperError> {
        let units = self.client.lock().read_register(REG_ACTUAL_POSITION)?;
        Ok(units as f64 / TRAVEL)
    }

    fn set_force(&self, pct: u16) -> Result<(), GripperError> {
        self.client.lock().write_register(REG_FORCE, pct)?;
        self.state.lock().force = pct;
        Ok(())
    }

    fn set_speed(&self, pct: u16) -> Result<(), GripperError> {
        self.client.lock().write_register(REG_SPEED, pct)?;
        self.state.lock().speed = pct;
        Ok(())
    }

    fn state(&self) -> GripperState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_modbus::mock::RegisterBankTransport;
    use std::time::Duration;

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            max_activation_polls: 3,
            max_motion_polls: 3,
        }
    }

    fn make_gripper(bank: RegisterBankTransport) -> DirectGripper<RegisterBankTransport> {
        DirectGripper::with_poll_config(ModbusClient::new(bank, 0x01), fast_poll())
    }

    #[test]
    fn test_initialize_writes_magic_and_waits_ready() {
        let mut bank = RegisterBankTransport::new();
        bank.set_register(REG_INIT_STATE, 1);
        let gripper = make_gripper(bank);

        gripper.initialize().unwrap();
    }

    #[test]
    fn test_initialize_times_out_when_never_ready() {
        let gripper = make_gripper(RegisterBankTransport::new());
        assert!(matches!(
            gripper.initialize(),
            Err(GripperError::ActivationTimeout { polls: 3 })
        ));
    }

    #[test]
    fn test_move_to_maps_normalized_to_units() {
        let gripper = make_gripper(RegisterBankTransport::new());
        gripper.move_to(0.7).unwrap();

        let client = gripper.client.lock();
        // 0.7 * 1000 = 700
        assert_eq!(client.transport().write_log.last(), Some(&(REG_POSITION, 700)));
        drop(client);

        let state = gripper.state();
        assert_eq!(state.position, 0.7);
        assert!(state.is_open);
    }

    #[test]
    fn test_move_to_clamps_out_of_range() {
        let gripper = make_gripper(RegisterBankTransport::new());
        gripper.move_to(1.5).unwrap();
        assert_eq!(
            gripper.client.lock().transport().write_log.last(),
            Some(&(REG_POSITION, 1000))
        );
    }

    #[test]
    fn test_move_to_blocking_times_out_without_completion() {
        let gripper = make_gripper(RegisterBankTransport::new());
        assert!(matches!(
            gripper.move_to_blocking(0.0),
            Err(GripperError::ActuationTimeout { polls: 3 })
        ));
    }

    #[test]
    fn test_move_to_blocking_completes_on_grip_state() {
        let mut bank = RegisterBankTransport::new();
        bank.set_register(REG_GRIP_STATE, 2);
        let gripper = make_gripper(bank);
        gripper.move_to_blocking(0.0).unwrap();
        assert!(!gripper.state().is_open);
    }

    #[test]
    fn test_read_position_normalizes_feedback() {
        let mut bank = RegisterBankTransport::new();
        bank.set_register(REG_ACTUAL_POSITION, 350);
        let gripper = make_gripper(bank);
        assert!((gripper.read_position().unwrap() - 0.35).abs() < 1e-9);
    }
}
