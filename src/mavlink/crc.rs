//! # MAVLink CRC-16 (X.25 / MCRF4XX)
//!
//! Bit-reversed CRC-16 processed LSB-first.
//!
//! **Polynomial**: 0x1021, reflected 0x8408
//! **Initial Value**: 0xFFFF
//!
//! This is not the reflected CRC-16/IBM polynomial 0xA001 (CRC-16/ARC).
//! Frames checksummed with 0xA001 are rejected by every MAVLink parser, so
//! only the 0x8408 register update is used here.
//!
//! The frame checksum covers LEN through the end of the payload and then folds
//! in one more byte, the message's `CRC_EXTRA`.

/// Reflected CRC-16 polynomial
const CRC16_POLY_REFLECTED: u16 = 0x8408;

/// Initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Fold one byte into the CRC register
pub fn crc16_accumulate(crc: u16, byte: u8) -> u16 {
    (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize]
}

/// CRC-16/MCRF4XX over a byte slice
///
/// # Examples
///
/// ```
/// use starlink_gps_bridge::mavlink::crc::crc16_x25;
///
/// assert_eq!(crc16_x25(b"123456789"), 0x6F91);
/// ```
pub fn crc16_x25(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| crc16_accumulate(crc, byte))
}

/// Frame checksum: CRC over LEN..PAYLOAD, then one round with `crc_extra`
///
/// # Arguments
///
/// * `data` - Frame bytes after STX up to the end of the payload
/// * `crc_extra` - Message-specific seed byte
pub fn frame_crc(data: &[u8], crc_extra: u8) -> u16 {
    crc16_accumulate(crc16_x25(data), crc_extra)
}

/// Bit-by-bit variant used to cross-check the table
#[allow(dead_code)]
fn crc16_x25_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16_x25(&[]), CRC16_INIT);
    }

    #[test]
    fn test_crc16_check_value() {
        // Catalogued check value for CRC-16/MCRF4XX
        assert_eq!(crc16_x25(b"123456789"), 0x6F91);
        assert_eq!(crc16_x25_slow(b"123456789"), 0x6F91);
    }

    #[test]
    fn test_crc16_lookup_table_matches_slow() {
        let test_data = [
            vec![0x01, 0x02, 0x03],
            vec![0xFF, 0xFE, 0xFD],
            vec![0x09, 0x00, 0x01, 0xDC, 0x00],
            vec![0x00; 30],
            vec![0xFF; 101],
        ];

        for data in test_data.iter() {
            assert_eq!(
                crc16_x25(data),
                crc16_x25_slow(data),
                "CRC mismatch for data: {:?}",
                data
            );
        }
    }

    #[test]
    fn test_heartbeat_frame_crc_vector() {
        // LEN SEQ SYS COMP MSG | custom_mode type autopilot base_mode status version
        let data = [
            0x09, 0x00, 0x01, 0xDC, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x08, 0x00, 0x03, 0x03,
        ];
        let crc = frame_crc(&data, 50);

        assert_eq!((crc & 0xFF) as u8, 0x22);
        assert_eq!((crc >> 8) as u8, 0xA9);
    }

    #[test]
    fn test_not_the_0xa001_variant() {
        assert_eq!(CRC16_POLY_REFLECTED, 0x8408);
        // 0xA001 with init 0xFFFF (CRC-16/MODBUS) checks to 0x4B37
        assert_ne!(crc16_x25(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc_extra_changes_result() {
        let data = [0x09, 0x00, 0x01, 0xDC, 0x00];
        assert_ne!(frame_crc(&data, 50), frame_crc(&data, 24));
    }
}
