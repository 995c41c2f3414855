//! Frame validation for the two instrument families
//!
//! Imager frames carry no checksum; a candidate is accepted when both its
//! first byte and the byte just past its end carry the sync pattern.
//! Spectrometer frames end with a 16-bit additive checksum.

/// Bits of an imager boundary byte that carry the sync pattern.
pub const IMAGER_SYNC_MASK: u8 = 0xFC;

/// Value of the masked bits on a boundary byte.
pub const IMAGER_SYNC_PATTERN: u8 = 0xAC;

/// Two-byte prefix of every spectrometer frame.
pub const SPECTROMETER_SYNC: [u8; 2] = [0xEB, 0x90];

/// Whether `byte` carries the imager sync pattern in its top six bits.
#[inline]
pub fn imager_sync(byte: u8) -> bool {
    byte & IMAGER_SYNC_MASK == IMAGER_SYNC_PATTERN
}

/// Assemble the 3-bit imager type code from the first two frame bytes.
///
/// Bits 1..0 of the first byte become bits 2..1 of the code, bit 7 of the
/// second byte becomes bit 0.
#[inline]
pub fn imager_type_code(first: u8, second: u8) -> u8 {
    ((first & 0x03) << 1) | ((second & 0x80) >> 7)
}

/// Check the start boundary at `start` and the end boundary at `start + len`.
///
/// Returns false when the end boundary lies outside `buf`.
pub fn imager_boundaries_valid(buf: &[u8], start: usize, len: usize) -> bool {
    match (buf.get(start), buf.get(start + len)) {
        (Some(&first), Some(&next)) => imager_sync(first) && imager_sync(next),
        _ => false,
    }
}

/// Sum of big-endian 16-bit words, truncated to 16 bits.
///
/// An odd trailing byte counts as the high half of a final word.
pub fn additive_checksum(body: &[u8]) -> u16 {
    body.chunks(2).fold(0u16, |total, word| {
        let value = match word {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from(*hi) << 8,
            _ => 0,
        };
        total.wrapping_add(value)
    })
}

/// Validate a whole spectrometer frame against its trailing checksum.
///
/// The checksum covers every byte before the final two, prefix included,
/// and is stored big-endian.
pub fn spectrometer_checksum_valid(frame: &[u8]) -> bool {
    let Some(split) = frame.len().checked_sub(2) else {
        return false;
    };
    let (body, stored) = frame.split_at(split);
    additive_checksum(body) == u16::from_be_bytes([stored[0], stored[1]])
}
