//! Multi-byte unsigned integers: big-endian base-128, high bit = continuation.

use std::io::{Read, Write};

use crate::error::{CodecError, CodecResult};

/// A u32 never needs more than five 7-bit groups.
pub const MAX_LEN: usize = 5;

/// Encodes `value` into its minimal byte form.
pub fn encode(value: u32) -> Vec<u8> {
    let mut groups = Vec::with_capacity(MAX_LEN);
    let mut rest = value;
    loop {
        groups.push((rest & 0x7F) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    for byte in &mut groups[..last] {
        *byte |= 0x80;
    }
    groups
}

/// Number of bytes [`encode`] produces for `value`.
pub fn encoded_len(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn write<W: Write>(writer: &mut W, value: u32) -> CodecResult<()> {
    writer.write_all(&encode(value))?;
    Ok(())
}

/// Reads one mbuint. Fails on overflow past u32 or on end of stream.
pub fn read<R: Read>(reader: &mut R) -> CodecResult<u32> {
    let mut value: u32 = 0;
    for _ in 0..MAX_LEN {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte)? == 0 {
            return Err(CodecError::Truncated("multi-byte integer"));
        }
        if value > (u32::MAX >> 7) {
            return Err(CodecError::InvalidLength(
                "multi-byte integer overflows 32 bits".into(),
            ));
        }
        value = (value << 7) | u32::from(byte[0] & 0x7F);
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::InvalidLength(format!(
        "multi-byte integer longer than {MAX_LEN} bytes"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(0x7F), vec![0x7F]);
        assert_eq!(encode(0x80), vec![0x81, 0x00]);
        assert_eq!(encode(0xA0), vec![0x81, 0x20]);
        assert_eq!(encode(0x3FFF), vec![0xFF, 0x7F]);
        assert_eq!(encode(0x4000), vec![0x81, 0x80, 0x00]);
        assert_eq!(encode(u32::MAX), vec![0x8F, 0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_round_trip_and_length() {
        let samples = [
            0u32, 1, 5, 106, 127, 128, 255, 300, 16_383, 16_384, 65_535, 1 << 20,
            2_097_151, 2_097_152, 268_435_455, 268_435_456, u32::MAX,
        ];
        for value in samples {
            let bytes = encode(value);
            let bits = 32 - value.leading_zeros() as usize;
            let expected = if bits == 0 { 1 } else { (bits + 6) / 7 };
            assert_eq!(bytes.len(), expected, "length of {value}");
            assert_eq!(encoded_len(value), expected);
            assert_eq!(read(&mut bytes.as_slice()).unwrap(), value);
        }
    }

    #[test]
    fn test_truncated() {
        let err = read(&mut [0x81u8].as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn test_overflow() {
        let err = read(&mut [0x90u8, 0x80, 0x80, 0x80, 0x00].as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidLength(_)));

        let err = read(&mut [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x00].as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidLength(_)));
    }
}
