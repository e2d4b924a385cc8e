//! CRC-16/MODBUS checksum.

/// Reflected generator polynomial of the Modbus CRC.
const POLYNOMIAL: u16 = 0xA001;

/// Computes the CRC-16/MODBUS checksum over `data`.
///
/// The register starts at `0xFFFF`; each byte is XORed into the low half
/// and shifted out bit by bit. On the wire the checksum trails the frame
/// low byte first, which [`u16::to_le_bytes`] produces directly.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
        }
    }
    crc
}
