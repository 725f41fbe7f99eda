//! 触发变体
//!
//! 32 位行程目标拆分为高/低两个 16 位字写入（功能码 0x10），
//! 另需向触发寄存器写 1 才开始运动。行程方向与归一化方向相反：
//! 原生 0 = 完全张开，9000 = 完全闭合。

use crate::{Gripper, GripperError, GripperState, PollConfig, clamp_normalized};
use marionette_modbus::{ModbusClient, Transport};
use parking_lot::Mutex;
use tracing::{debug, info};

// ==================== 寄存器映射 ====================

/// 位置目标高字寄存器（低字在下一地址）
const REG_POSITION_PAIR: u16 = 0x0102;
/// 速度寄存器
const REG_SPEED: u16 = 0x0104;
/// 力寄存器
const REG_FORCE: u16 = 0x0105;
/// 运动触发寄存器（写 1 开始运动）
const REG_TRIGGER: u16 = 0x0108;
/// 实际位置反馈高字寄存器
const REG_FEEDBACK_HIGH: u16 = 0x0609;
/// 实际位置反馈低字寄存器
const REG_FEEDBACK_LOW: u16 = 0x060A;

/// 目标行程量程（反向）
const TARGET_TRAVEL: f64 = 9000.0;
/// 反馈行程量程（设备反馈与目标量程不同）
const FEEDBACK_TRAVEL: f64 = 1000.0;

/// 归一化位置转原生目标单位
///
/// 0.0（闭合）→ 9000，1.0（张开）→ 0。
fn normalized_to_units(position: f64) -> u32 {
    let position = clamp_normalized(position);
    (TARGET_TRAVEL - position * TARGET_TRAVEL).round() as u32
}

/// 反馈单位转归一化位置
///
/// 反馈量程为 0..=1000，方向同样相反；越界值先钳位。
fn units_to_normalized(units: u32) -> f64 {
    let units = (units as f64).clamp(0.0, FEEDBACK_TRAVEL);
    (FEEDBACK_TRAVEL - units) / FEEDBACK_TRAVEL
}

/// 触发式夹爪
pub struct TriggeredGripper<T> {
    client: Mutex<ModbusClient<T>>,
    state: Mutex<GripperState>,
    poll: PollConfig,
}

impl<T: Transport> TriggeredGripper<T> {
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

    /// 写位置目标并触发运动
    fn command_position(&self, position: f64) -> Result<(), GripperError> {
        let position = clamp_normalized(position);
        let units = normalized_to_units(position);
        {
            let mut client = self.client.lock();
            client.write_register_pair(REG_POSITION_PAIR, units)?;
            client.write_register(REG_TRIGGER, 1)?;
        }
        self.state.lock().record_command(position);
        debug!("Triggered gripper commanded to {} units", units);
        Ok(())
    }

    fn read_feedback_units(&self) -> Result<u32, GripperError> {
        let mut client = self.client.lock();
        let high = client.read_register(REG_FEEDBACK_HIGH)? as u32;
        let low = client.read_register(REG_FEEDBACK_LOW)? as u32;
        Ok((high << 16) | low)
    }
}

impl<T: Transport + Send> Gripper for TriggeredGripper<T> {
    fn initialize(&self) -> Result<(), GripperError> {
        // 该变体无激活寄存器：写入安全默认值即视为就绪
        let mut client = self.client.lock();
        client.write_register_pair(REG_POSITION_PAIR, normalized_to_units(0.0))?;
        client.write_register(REG_SPEED, 100)?;
        client.write_register(REG_FORCE, 100)?;
        drop(client);

        let mut state = self.state.lock();
        state.speed = 100;
        state.force = 100;
        drop(state);

        info!("Triggered gripper initialized");
        Ok(())
    }

    fn move_to(&self, position: f64) -> Result<(), GripperError> {
        self.command_position(position)
    }

    fn move_to_blocking(&self, position: f64) -> Result<(), GripperError> {
        self.command_position(position)?;

        // 无完成状态位：轮询反馈位置直到接近目标
        let target = clamp_normalized(position);
        for _ in 0..self.poll.max_motion_polls {
            let actual = units_to_normalized(self.read_feedback_units()?);
            if (actual - target).abs() < 0.05 {
                return Ok(());
            }
            std::thread::sleep(self.poll.interval);
        }
        Err(GripperError::ActuationTimeout {
            polls: self.poll.max_motion_polls,
        })
    }

    fn read_position(&self) -> Result<f64, GripperError> {
        Ok(units_to_normalized(self.read_feedback_units()?))
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
