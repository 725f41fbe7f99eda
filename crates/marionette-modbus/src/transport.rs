//! 串口传输抽象
//!
//! 链路是半双工 RS-485：一问一答，任何时刻只有一个在途事务。
//! 传输层只负责字节搬运，不做任何协议逻辑。

use crate::TransportError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::info;

/// 串口参数
///
/// 两种夹爪变体均为 115200 8N1、无流控、约 1 秒请求超时。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// 端口标识（如 `/dev/ttyUSB0`）
    pub port: String,
    /// 波特率
    pub baud_rate: u32,
    /// 读超时
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_secs(1),
        }
    }
}

/// 阻塞式字节传输
///
/// `read` 在超时内最多填充 `buf.len()` 字节并返回实际读到的字节数，
/// 超时返回 `Ok(0)`；链路级故障（设备拔出等）返回 `Err`。
pub trait Transport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// 基于 `serialport` 的串口传输
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
}

impl SerialPortTransport {
    /// 打开串口
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()?;

        info!(
            "Opened serial port {} at {} baud",
            config.port, config.baud_rate
        );

        Ok(Self { port })
    }
}

impl Transport for SerialPortTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let written = self.port.write(data)?;
        self.port.flush()?;
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
