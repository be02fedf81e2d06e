//! CRC-16 used by unkeyed SATL frames and CRC-protected commands.
//!
//! Reflected CCITT polynomial (0x8408), initial value 0xFFFF, no final XOR.

const CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8408 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the CRC-16 of `data`.
pub fn calculate_crc(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |acc, &byte| {
        (acc >> 8) ^ CRC_TABLE[((acc ^ byte as u16) & 0xFF) as usize]
    })
}
