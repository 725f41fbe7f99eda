//! Mock 传输（`feature = "mock"`）
//!
//! 在内存中模拟一个寄存器设备：解析请求帧、维护寄存器表、
//! 生成符合协议的应答帧。供上层 crate 在无硬件环境下测试。

use crate::Transport;
use crate::TransportError;
use crate::crc::crc16_bytes;
use crate::frame::FunctionCode;
use std::collections::HashMap;

/// 内存寄存器设备
pub struct RegisterBankTransport {
    /// 寄存器表
    pub registers: HashMap<u16, u16>,
    /// 按序记录的写入（寄存器，值）
    pub write_log: Vec<(u16, u16)>,
    pending_reply: Vec<u8>,
}

impl RegisterBankTransport {
    pub fn new() -> Self {
        Self {
            registers: HashMap::new(),
            write_log: Vec::new(),
            pending_reply: Vec::new(),
        }
    }

    /// 预置寄存器值
    pub fn set_register(&mut self, register: u16, value: u16) {
        self.registers.insert(register, value);
    }

    fn reply_read(&mut self, addr: u8, register: u16) {
        let value = *self.registers.get(&register).unwrap_or(&0);
        let mut reply = vec![addr, FunctionCode::ReadHolding.into(), 0x02];
        reply.extend_from_slice(&value.to_be_bytes());
        let crc = crc16_bytes(&reply);
        reply.extend_from_slice(&crc);
        self.pending_reply = reply;
    }
}

impl Default for RegisterBankTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for RegisterBankTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let addr = data[0];
        let register = u16::from_be_bytes([data[2], data[3]]);
        match FunctionCode::try_from(data[1]) {
            Ok(FunctionCode::ReadHolding) => {
                self.reply_read(addr, register);
            },
            Ok(FunctionCode::WriteSingle) => {
                let value = u16::from_be_bytes([data[4], data[5]]);
                self.registers.insert(register, value);
                self.write_log.push((register, value));
                // 完整回显
                self.pending_reply = data.to_vec();
            },
            Ok(FunctionCode::WriteMultiple) => {
                let value = u32::from_be_bytes([data[7], data[8], data[9], data[10]]);
                let high = (value >> 16) as u16;
                let low = (value & 0xFFFF) as u16;
                self.registers.insert(register, high);
                self.registers.insert(register + 1, low);
                self.write_log.push((register, high));
                self.write_log.push((register + 1, low));
                // 回显头部 + CRC
                let mut reply = data[..6].to_vec();
                let crc = crc16_bytes(&reply);
                reply.extend_from_slice(&crc);
                self.pending_reply = reply;
            },
            Err(_) => {
                self.pending_reply.clear();
            },
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.pending_reply.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending_reply[..n]);
        self.pending_reply.drain(..n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModbusClient;

    #[test]
    fn test_register_bank_roundtrip() {
        let mut bank = RegisterBankTransport::new();
        bank.set_register(0x0202, 350);
        let mut client = ModbusClient::new(bank, 0x01);

        assert_eq!(client.read_register(0x0202).unwrap(), 350);
        client.write_register(0x0104, 100).unwrap();
        client.write_register_pair(0x0102, 9000).unwrap();
    }
}
