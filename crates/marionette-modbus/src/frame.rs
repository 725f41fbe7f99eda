//! 请求帧构建与应答帧解析
//!
//! 一次事务对应一个固定长度的请求帧和一个固定长度的应答帧。
//! 帧结构：设备地址 + 功能码 + 寄存器地址（大端 16 位）+ 载荷 + CRC-16（小端）。

use crate::TransportError;
use crate::crc::{crc16, crc16_bytes};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 读单个寄存器请求帧长度
pub const READ_REQUEST_LEN: usize = 8;
/// 读单个寄存器应答帧长度（地址 + 功能码 + 字节数 + 2 字节数据 + CRC）
pub const READ_REPLY_LEN: usize = 7;
/// 写单个寄存器请求帧长度
pub const WRITE_REQUEST_LEN: usize = 8;
/// 写单个寄存器应答帧长度（完整回显请求）
pub const WRITE_REPLY_LEN: usize = 8;
/// 写寄存器对请求帧长度（32 位值拆分为两个寄存器）
pub const WRITE_PAIR_REQUEST_LEN: usize = 13;
/// 写寄存器对应答帧长度（回显头部 + CRC）
pub const WRITE_PAIR_REPLY_LEN: usize = 8;

/// 功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    /// 读保持寄存器
    ReadHolding = 0x03,
    /// 写单个寄存器
    WriteSingle = 0x06,
    /// 写多个寄存器（用于 32 位位置目标）
    WriteMultiple = 0x10,
}

/// 构建读单个寄存器请求
pub fn read_request(device_addr: u8, register: u16) -> [u8; READ_REQUEST_LEN] {
    let mut buf = [0u8; READ_REQUEST_LEN];
    buf[0] = device_addr;
    buf[1] = FunctionCode::ReadHolding.into();
    buf[2..4].copy_from_slice(&register.to_be_bytes());
    // 寄存器数量固定为 1
    buf[4] = 0x00;
    buf[5] = 0x01;
    let crc = crc16_bytes(&buf[..6]);
    buf[6..8].copy_from_slice(&crc);
    buf
}

/// 构建写单个寄存器请求
pub fn write_request(device_addr: u8, register: u16, value: u16) -> [u8; WRITE_REQUEST_LEN] {
    let mut buf = [0u8; WRITE_REQUEST_LEN];
    buf[0] = device_addr;
    buf[1] = FunctionCode::WriteSingle.into();
    buf[2..4].copy_from_slice(&register.to_be_bytes());
    buf[4..6].copy_from_slice(&value.to_be_bytes());
    let crc = crc16_bytes(&buf[..6]);
    buf[6..8].copy_from_slice(&crc);
    buf
}

/// 构建写寄存器对请求
///
/// 32 位值以大端拆分为高/低两个 16 位字，写入 `register` 与 `register + 1`。
pub fn write_pair_request(device_addr: u8, register: u16, value: u32) -> [u8; WRITE_PAIR_REQUEST_LEN] {
    let mut buf = [0u8; WRITE_PAIR_REQUEST_LEN];
    buf[0] = device_addr;
    buf[1] = FunctionCode::WriteMultiple.into();
    buf[2..4].copy_from_slice(&register.to_be_bytes());
    // 寄存器数量 2，字节数 4
    buf[4] = 0x00;
    buf[5] = 0x02;
    buf[6] = 0x04;
    buf[7..11].copy_from_slice(&value.to_be_bytes());
    let crc = crc16_bytes(&buf[..11]);
    buf[11..13].copy_from_slice(&crc);
    buf
}

/// 校验应答帧尾部的 CRC
///
/// 对除最后两字节外的帧体重新计算 CRC-16，与帧尾（小端）比较。
/// 不一致的帧按"未收到应答"处理（调用方计入重试预算）。
pub fn verify_crc(frame: &[u8]) -> Result<(), TransportError> {
    debug_assert!(frame.len() >= 4);
    let body = &frame[..frame.len() - 2];
    let expected = crc16(body);
    let actual = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    if expected != actual {
        return Err(TransportError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// 从读应答帧中提取 16 位寄存器值（大端）
///
/// 调用前须已通过 [`verify_crc`] 校验。
pub fn read_reply_value(reply: &[u8]) -> u16 {
    debug_assert_eq!(reply.len(), READ_REPLY_LEN);
    u16::from_be_bytes([reply[3], reply[4]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let frame = read_request(0x01, 0x0202);
        assert_eq!(frame[0], 0x01);
        assert_eq!(frame[1], 0x03);
        assert_eq!(&frame[2..4], &[0x02, 0x02]);
        assert_eq!(&frame[4..6], &[0x00, 0x01]);
        verify_crc(&frame).unwrap();
    }

    #[test]
    fn test_write_request_layout() {
        let frame = write_request(0x01, 0x0103, 700);
        assert_eq!(frame[0], 0x01);
        assert_eq!(frame[1], 0x06);
        assert_eq!(&frame[2..4], &[0x01, 0x03]);
        assert_eq!(&frame[4..6], &700u16.to_be_bytes());
        verify_crc(&frame).unwrap();
    }

    #[test]
    fn test_write_pair_request_layout() {
        let frame = write_pair_request(0x01, 0x0102, 9000);
        assert_eq!(frame[0], 0x01);
        assert_eq!(frame[1], 0x10);
        assert_eq!(&frame[2..4], &[0x01, 0x02]);
        assert_eq!(&frame[4..7], &[0x00, 0x02, 0x04]);
        assert_eq!(&frame[7..11], &9000u32.to_be_bytes());
        verify_crc(&frame).unwrap();
    }

    #[test]
    fn test_verify_crc_rejects_corruption() {
        let mut frame = write_request(0x01, 0x0101, 100);
        frame[4] ^= 0x40;
        assert!(matches!(
            verify_crc(&frame),
            Err(TransportError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_read_reply_value_big_endian() {
        // 应答帧：地址 + 功能码 + 字节数 + 数据高位 + 数据低位 + CRC
        let mut reply = [0x01, 0x03, 0x02, 0x03, 0xE8, 0x00, 0x00];
        let crc = crate::crc::crc16_bytes(&reply[..5]);
        reply[5..7].copy_from_slice(&crc);
        verify_crc(&reply).unwrap();
        assert_eq!(read_reply_value(&reply), 1000);
    }

    #[test]
    fn test_function_code_roundtrip() {
        assert_eq!(FunctionCode::try_from(0x03), Ok(FunctionCode::ReadHolding));
        assert_eq!(FunctionCode::try_from(0x06), Ok(FunctionCode::WriteSingle));
        assert_eq!(FunctionCode::try_from(0x10), Ok(FunctionCode::WriteMultiple));
        assert!(FunctionCode::try_from(0x05).is_err());
    }
}
