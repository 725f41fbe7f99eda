//! # Marionette Modbus
//!
//! 夹爪执行器的寄存器式串口链路驱动（Modbus RTU 变体，无上层业务依赖）
//!
//! ## 模块
//!
//! - `crc`: CRC-16 校验和计算（多项式 0xA001，反射，初值 0xFFFF）
//! - `frame`: 请求帧构建与应答帧解析
//! - `transport`: 串口传输抽象（阻塞式，半双工）
//! - `client`: 带重试的寄存器读写客户端
//!
//! ## 字节序
//!
//! 寄存器地址与寄存器值使用大端字节序（高位在前），
//! 帧尾的 CRC-16 使用小端字节序（低位在前）。
//!
//! ## 重试策略
//!
//! 每次事务最多尝试 3 次：写入不完整、应答长度不符、应答校验失败
//! 均视为瞬态故障并重试；3 次连续失败后返回 [`TransportError::Exhausted`]。

pub mod client;
pub mod crc;
pub mod frame;
#[cfg(feature = "mock")]
pub mod mock;
pub mod transport;

pub use client::ModbusClient;
pub use frame::FunctionCode;
pub use transport::{SerialConfig, SerialPortTransport, Transport};

use thiserror::Error;

/// 传输层错误类型
///
/// `Incomplete` 与 `ChecksumMismatch` 在客户端内部被重试吸收，
/// 只有耗尽重试预算后才以 `Exhausted` 形式向上层暴露；
/// `Serial` 与 `Io` 表示串口链路本身不可用（不重试，直接上抛）。
#[derive(Error, Debug)]
pub enum TransportError {
    /// 写入字节数不足
    #[error("Incomplete write: {written}/{expected} bytes")]
    Incomplete { written: usize, expected: usize },

    /// 应答帧校验和不匹配
    #[error("Checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// 重试预算耗尽
    #[error("Transaction failed after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// 串口设备错误（打开失败、链路丢失）
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// 系统 IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
