//! 遥操作配置
//!
//! TOML 配置文件，分节对应各子系统；所有字段都有设计默认值，
//! 文件中只需写出要覆盖的节。

use crate::pedal::PedalConfig;
use crate::session::LoopConfig;
use crate::sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// 夹爪变体选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperVariant {
    /// 16 位行程、写位置即运动
    Direct,
    /// 32 位行程、写触发寄存器才运动
    Triggered,
}

/// 控制循环节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSection {
    /// 控制频率（Hz）
    pub rate_hz: f64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self { rate_hz: 100.0 }
    }
}

/// 踏板节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PedalSection {
    /// 双击窗口（秒）
    pub double_press_window_s: f64,
    /// 空闲超时（秒）
    pub idle_timeout_s: f64,
}

impl Default for PedalSection {
    fn default() -> Self {
        Self {
            double_press_window_s: 0.5,
            idle_timeout_s: 5.0,
        }
    }
}

/// 同步节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub gate_threshold: f64,
    pub sync_threshold: f64,
    pub max_step: f64,
    pub sub_steps: u32,
    pub max_attempts: u32,
    /// 标定耗尽时终止会话
    pub abort_on_exhaustion: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            gate_threshold: 0.8,
            sync_threshold: 0.5,
            max_step: 0.05,
            sub_steps: 25,
            max_attempts: 5,
            abort_on_exhaustion: true,
        }
    }
}

/// 夹爪节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GripperSection {
    /// 是否启用夹爪（决定关节向量 6 还是 7 槽位）
    pub enabled: bool,
    /// 设备变体
    pub variant: GripperVariant,
    /// 张开指令的目标位置（满行程比例）
    pub open_position: f64,
    /// 初始夹持力（百分比）
    pub default_force: u16,
    /// 初始速度（百分比）
    pub default_speed: u16,
}

impl Default for GripperSection {
    fn default() -> Self {
        Self {
            enabled: true,
            variant: GripperVariant::Triggered,
            open_position: 0.7,
            default_force: 100,
            default_speed: 100,
        }
    }
}

/// 串口节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// 设备地址
    pub device_addr: u8,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 1000,
            device_addr: 0x01,
        }
    }
}

/// 遥操作配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TeleopConfig {
    pub control: ControlSection,
    pub pedal: PedalSection,
    pub sync: SyncSection,
    pub gripper: GripperSection,
    pub serial: SerialSection,
}

impl TeleopConfig {
    /// 从 TOML 文件加载
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// 保存为 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn pedal_config(&self) -> PedalConfig {
        PedalConfig {
            double_press_window: Duration::from_secs_f64(self.pedal.double_press_window_s),
            idle_timeout: Duration::from_secs_f64(self.pedal.idle_timeout_s),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            gate_threshold: self.sync.gate_threshold,
            sync_threshold: self.sync.sync_threshold,
            max_step: self.sync.max_step,
            sub_steps: self.sync.sub_steps,
            max_attempts: self.sync.max_attempts,
            step_period: Duration::from_secs_f64(1.0 / self.control.rate_hz),
            gate_poll_period: Duration::from_millis(100),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            rate_hz: self.control.rate_hz,
            max_ticks: None,
            abort_on_sync_exhaustion: self.sync.abort_on_exhaustion,
        }
    }
}
