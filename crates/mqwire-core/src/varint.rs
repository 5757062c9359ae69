//! Variable Byte Integer encoding for the MQTT remaining length field.
//!
//! The fixed header carries the byte count of the rest of the packet as a
//! variable-length integer: 7 value bits per byte, high bit set when more
//! bytes follow. This gives:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use std::io::Read;

use crate::error::{ProtocolError, Result};

/// Largest value the remaining length field can carry (0x0FFF_FFFF).
pub const MAX_REMAINING_LENGTH: u32 = 0x0FFF_FFFF;

/// Decode a variable byte integer from a stream.
///
/// Returns the value and the number of bytes consumed (1-4). Fails with
/// `InvalidRemainingLength` if the fourth byte still has its continuation
/// bit set; a stream that ends mid-integer surfaces as an I/O error.
pub fn decode<R: Read>(r: &mut R) -> Result<(u32, usize)> {
    let mut multiplier = 1u32;
    let mut value = 0u32;

    for i in 0..4 {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        value += ((byte[0] & 0x7F) as u32) * multiplier;

        if (byte[0] & 0x80) == 0 {
            return Ok((value, i + 1));
        }

        multiplier *= 128;
    }

    Err(ProtocolError::InvalidRemainingLength.into())
}

/// Encode a value as a variable byte integer, appending to a Vec.
///
/// Returns the number of bytes written (1-4). Values above
/// [`MAX_REMAINING_LENGTH`] fail with `InvalidRemainingLength`. Zero
/// encodes as a single zero byte.
pub fn encode(value: u32, buf: &mut Vec<u8>) -> std::result::Result<usize, ProtocolError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::InvalidRemainingLength);
    }

    let start = buf.len();
    let mut val = value;
    loop {
        let mut byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if val == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Calculate the number of bytes needed to encode a value.
pub fn encoded_len(mut value: u32) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}
