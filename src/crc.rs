//! CRC-16/ARC (a.k.a. CRC-16/IBM) as computed by Teltonika devices.
//!
//! Polynomial 0x8005 in reflected form (0xA001), initial value 0, no final
//! XOR. Devices compute it over the codec id through the trailing record
//! count, excluding the 8-byte header and the CRC field itself.

const POLY_REFLECTED: u16 = 0xA001;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY_REFLECTED } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the CRC-16/ARC checksum of `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |crc, &byte| TABLE[((crc ^ byte as u16) & 0xFF) as usize] ^ (crc >> 8))
}

/// Check `bytes` against a received checksum.
pub fn crc16_matches(bytes: &[u8], received: u16) -> bool {
    crc16(bytes) == received
}
