//! # Marionette Gripper
//!
//! 末端执行器（夹爪）控制：把归一化的开合指令映射到设备原生寄存器，
//! 通过 [`marionette-modbus`](marionette_modbus) 的寄存器链路驱动执行器。
//!
//! ## 设备变体
//!
//! - `direct`: 16 位行程目标，写位置寄存器即开始运动（0 = 闭合，1000 = 张开）
//! - `triggered`: 32 位行程目标拆分为高/低字写入，另需写触发寄存器才开始运动，
//!   行程方向与归一化方向相反
//!
//! ## 方向约定
//!
//! 归一化位置 0.0 = 完全闭合，1.0 = 完全张开；设备原生量程与方向在构造时固定。
//!
//! ## 并发
//!
//! 链路是共享的半双工串口，寄存器访问必须串行化：每个设备将
//! `ModbusClient` 包在 `parking_lot::Mutex` 里，任何时刻至多一个在途事务。

pub mod direct;
pub mod triggered;

pub use direct::DirectGripper;
pub use triggered::TriggeredGripper;

use marionette_modbus::TransportError;
use std::time::Duration;
use thiserror::Error;

/// 归一化开合的张开判定阈值
///
/// 开/合状态由最近一次指令位置推导，不维护独立的布尔标志。
pub const OPEN_THRESHOLD: f64 = 0.5;

/// 夹爪层错误类型
#[derive(Error, Debug)]
pub enum GripperError {
    /// 链路错误（重试耗尽或链路丢失）
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 等待运动完成超时
    #[error("Actuation timeout after {polls} polls")]
    ActuationTimeout { polls: u32 },

    /// 等待初始化完成超时
    #[error("Activation timeout after {polls} polls")]
    ActivationTimeout { polls: u32 },
}

impl GripperError {
    /// 链路本身已不可用（端口错误、设备拔出），重试与降级均无意义
    pub fn is_link_lost(&self) -> bool {
        matches!(
            self,
            GripperError::Transport(TransportError::Serial(_) | TransportError::Io(_))
        )
    }
}

/// 夹爪状态
///
/// 由控制器独占持有；`position` 是最近一次指令值，在显式回读之前
/// 不保证与硬件一致。`is_open` 始终由 `position` 推导。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperState {
    /// 最近一次指令的归一化位置 [0, 1]
    pub position: f64,
    /// 开合状态（由 `position` 推导）
    pub is_open: bool,
    /// 力百分比
    pub force: u16,
    /// 速度百分比
    pub speed: u16,
}

impl Default for GripperState {
    fn default() -> Self {
        Self {
            position: 0.0,
            is_open: false,
            force: 0,
            speed: 0,
        }
    }
}

impl GripperState {
    /// 记录新的指令位置并重新推导开合状态
    pub(crate) fn record_command(&mut self, position: f64) {
        self.position = position;
        self.is_open = position >= OPEN_THRESHOLD;
    }
}

/// 状态轮询参数
///
/// 默认值对应设备手册建议的 200ms 轮询周期；
/// 激活等待最多 150 次（约 30 秒），运动等待最多 25 次（约 5 秒）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// 轮询周期
    pub interval: Duration,
    /// 初始化等待的最大轮询次数
    pub max_activation_polls: u32,
    /// 运动完成等待的最大轮询次数
    pub max_motion_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            max_activation_polls: 150,
            max_motion_polls: 25,
        }
    }
}

/// 夹爪设备统一接口
///
/// 所有方法同步阻塞。`move_to` 不等待物理运动完成；
/// `move_to_blocking` 轮询状态寄存器直到观察到完成位或轮询预算耗尽。
pub trait Gripper: Send {
    /// 初始化执行器（激活、等待就绪）
    fn initialize(&self) -> Result<(), GripperError>;

    /// 命令归一化位置（0 = 闭合，1 = 张开），不等待物理完成
    fn move_to(&self, position: f64) -> Result<(), GripperError>;

    /// 命令归一化位置并阻塞等待运动完成
    fn move_to_blocking(&self, position: f64) -> Result<(), GripperError>;

    /// 回读执行器实际位置（归一化）
    fn read_position(&self) -> Result<f64, GripperError>;

    /// 设置夹持力（百分比 0-100）
    fn set_force(&self, pct: u16) -> Result<(), GripperError>;

    /// 设置运动速度（百分比 0-100）
    fn set_speed(&self, pct: u16) -> Result<(), GripperError>;

    /// 当前控制器侧状态快照
    fn state(&self) -> GripperState;
}

impl<G: Gripper + ?Sized> Gripper for Box<G> {
    fn initialize(&self) -> Result<(), GripperError> {
        (**self).initialize()
    }

    fn move_to(&self, position: f64) -> Result<(), GripperError> {
        (**self).move_to(position)
    }

    fn move_to_blocking(&self, position: f64) -> Result<(), GripperError> {
        (**self).move_to_blocking(position)
    }

    fn read_position(&self) -> Result<f64, GripperError> {
        (**self).read_position()
    }

    fn set_force(&self, pct: u16) -> Result<(), GripperError> {
        (**self).set_force(pct)
    }

    fn set_speed(&self, pct: u16) -> Result<(), GripperError> {
        (**self).set_speed(pct)
    }

    fn state(&self) -> GripperState {
        (**self).state()
    }
}

/// 归一化位置钳位到 [0, 1]
pub(crate) fn clamp_normalized(position: f64) -> f64 {
    position.clamp(0.0, 1.0)
}
