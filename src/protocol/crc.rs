//! Modbus CRC-16 (reflected polynomial 0xA001, initial value 0xFFFF).

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

/// CRC-16 over `data`, processed least-significant bit first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ POLY
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// Append the CRC of `frame` to it, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Split a frame into body and trailing CRC, returning `(expected, actual)`.
///
/// `expected` is recomputed over the body; `actual` is what the frame carries.
pub(crate) fn crc_pair(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < 2 {
        return None;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    Some((crc16(body), u16::from_le_bytes([tail[0], tail[1]])))
}

/// True when the last two bytes of `frame` are the little-endian CRC of the rest.
pub fn verify(frame: &[u8]) -> bool {
    matches!(crc_pair(frame), Some((expected, actual)) if expected == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vectors() {
        // Classic Modbus example: read 2 registers at 0x0000 from slave 1.
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn verify_rejects_short_input() {
        assert!(!verify(&[]));
        assert!(!verify(&[0xFF]));
    }

    #[test]
    fn append_is_little_endian() {
        let mut frame = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        append_crc(&mut frame);
        assert_eq!(&frame[6..], &[0xC4, 0x0B]);
        assert!(verify(&frame));
    }

    proptest! {
        #[test]
        fn prop_appended_crc_verifies(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut frame = data.clone();
            append_crc(&mut frame);
            prop_assert!(verify(&frame));
        }

        #[test]
        fn prop_single_bit_flip_detected(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            bit in any::<usize>(),
        ) {
            let mut frame = data.clone();
            append_crc(&mut frame);
            let bit = bit % (frame.len() * 8);
            frame[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(!verify(&frame));
        }
    }
}
