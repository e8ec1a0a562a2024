//! CRC-16/CCITT
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final XOR
//! (the variant usually called CCITT-FALSE). Packets carry it over their
//! payload only.

/// Initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

const POLY: u16 = 0x1021;

/// Feed `data` into a running CRC
pub fn crc16_ccitt_update(crc: u16, data: &[u8]) -> u16 {
    let mut crc = crc;

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// CRC-16/CCITT of `data`
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_ccitt_update(CRC16_INIT, data)
}
