//! 带重试的寄存器读写客户端
//!
//! 每次事务最多尝试 [`MAX_ATTEMPTS`] 次。瞬态故障（写入不完整、
//! 应答长度不符、应答校验失败、写回显不符）计入重试预算；
//! 链路级故障直接上抛，不消耗预算。

use crate::TransportError;
use crate::frame;
use crate::transport::Transport;
use tracing::{trace, warn};

/// 单次事务的最大尝试次数
pub const MAX_ATTEMPTS: u32 = 3;

/// 寄存器读写客户端
///
/// 持有传输独占所有权。半双工线路上的互斥由上层（夹爪控制器）
/// 以互斥锁包裹整个客户端来保证。
pub struct ModbusClient<T> {
    transport: T,
    device_addr: u8,
}

impl<T: Transport> ModbusClient<T> {
    pub fn new(transport: T, device_addr: u8) -> Self {
        Self {
            transport,
            device_addr,
        }
    }

    /// 访问底层传输（测试与诊断用）
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 读单个寄存器（功能码 0x03），返回大端 16 位值
    pub fn read_register(&mut self, register: u16) -> Result<u16, TransportError> {
        let request = frame::read_request(self.device_addr, register);
        let reply = self.transact(&request, frame::READ_REPLY_LEN, false)?;
        Ok(frame::read_reply_value(&reply))
    }

    /// 写单个寄存器（功能码 0x06）
    ///
    /// 应答是请求的完整回显；回显不符视为瞬态故障。
    pub fn write_register(&mut self, register: u16, value: u16) -> Result<(), TransportError> {
        let request = frame::write_request(self.device_addr, register, value);
        self.transact(&request, frame::WRITE_REPLY_LEN, true)?;
        Ok(())
    }

    /// 写寄存器对（功能码 0x10），32 位值大端拆分为高/低两字
    pub fn write_register_pair(&mut self, register: u16, value: u32) -> Result<(), TransportError> {
        let request = frame::write_pair_request(self.device_addr, register, value);
        let reply = self.transact(&request, frame::WRITE_PAIR_REPLY_LEN, false)?;
        // 应答回显头部（地址 + 功能码 + 起始寄存器 + 数量）
        if reply[..6] != request[..6] {
            // 头部不符的应答已经过 CRC 校验，说明设备答非所问
            warn!(
                "Write-pair reply header mismatch: {:02X?} vs {:02X?}",
                &reply[..6],
                &request[..6]
            );
        }
        Ok(())
    }

    /// 执行一次事务：写请求帧，阻塞等待定长应答帧
    ///
    /// 应答帧在信任之前必须通过接收端独立的 CRC 重算；
    /// 校验失败的帧按"未收到应答"丢弃（计入重试预算，不单独上报）。
    fn transact(
        &mut self,
        request: &[u8],
        reply_len: usize,
        expect_echo: bool,
    ) -> Result<Vec<u8>, TransportError> {
        for attempt in 1..=MAX_ATTEMPTS {
            // === 写请求 ===
            let written = self.transport.write(request)?;
            if written != request.len() {
                warn!(
                    "Incomplete write ({}/{} bytes), attempt {}/{}",
                    written,
                    request.len(),
                    attempt,
                    MAX_ATTEMPTS
                );
                continue;
            }

            // === 读应答 ===
            let mut reply = vec![0u8; reply_len];
            let received = self.read_reply(&mut reply)?;
            if received != reply_len {
                warn!(
                    "Unexpected reply length ({}/{} bytes), attempt {}/{}",
                    received, reply_len, attempt, MAX_ATTEMPTS
                );
                continue;
            }

            // === 校验 ===
            if let Err(e) = frame::verify_crc(&reply) {
                warn!("Reply discarded: {}, attempt {}/{}", e, attempt, MAX_ATTEMPTS);
                continue;
            }
            if expect_echo && reply != request {
                warn!(
                    "Write echo mismatch, attempt {}/{}: {:02X?}",
                    attempt, MAX_ATTEMPTS, reply
                );
                continue;
            }

            trace!("Transaction ok after {} attempt(s)", attempt);
            return Ok(reply);
        }

        Err(TransportError::Exhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// 累积读取至期望长度或超时
    ///
    /// 传输层的 `read` 在其内部超时上阻塞；连续两次空读视为应答结束。
    fn read_reply(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut filled = 0;
        let mut empty_reads = 0;
        while filled < buf.len() {
            let n = self.transport.read(&mut buf[filled..])?;
            if n == 0 {
                empty_reads += 1;
                if filled == 0 || empty_reads >= 2 {
                    break;
                }
                continue;
            }
            empty_reads = 0;
            filled += n;
        }
        Ok(filled)
    }
}
