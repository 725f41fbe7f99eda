//! CRC-16 校验和
//!
//! Modbus RTU 使用的 CRC-16 变体：多项式 0xA001（0x8005 的反射形式），
//! 初值 0xFFFF，逐字节、逐位（LSB 在前）处理。

/// 计算字节序列的 CRC-16 校验和
///
/// 发送端把结果以小端字节序附加在帧尾；接收端对帧体重新计算，
/// 与帧尾的值比较后才信任帧内容。
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-16 拆分为线上字节序（低位在前）
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    let crc = crc16(data);
    [(crc & 0xFF) as u8, (crc >> 8) as u8]
}
