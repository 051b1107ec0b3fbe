pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    let poly: u16 = 0xA001;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the checksum of `frame[..len - 2]` into its last two bytes, low byte first.
/// Frames too short to hold a checksum are left untouched.
pub(crate) fn seal(frame: &mut [u8]) {
    let Some(body) = frame.len().checked_sub(2) else {
        return;
    };
    let crc = crc16_modbus(&frame[..body]);
    frame[body..].copy_from_slice(&crc.to_le_bytes());
}

/// Checks the trailing little-endian CRC of a complete frame.
///
/// Returns `(calculated, received)` on mismatch so callers can report both.
pub fn verify(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 3 {
        return Err((crc16_modbus(frame), 0));
    }
    let body = frame.len() - 2;
    let received = u16::from_le_bytes([frame[body], frame[body + 1]]);
    let calculated = crc16_modbus(&frame[..body]);

    if received == calculated {
        Ok(())
    } else {
        Err((calculated, received))
    }
}
