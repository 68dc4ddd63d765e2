//! Byte-order helpers shared by the decoders.
//!
//! Callers validate frame lengths before reading; every helper indexes
//! directly.

/// Round half up, the way the wheels' reference apps round fixed-point values.
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

pub fn u16_be(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn i16_be(bytes: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn u32_be(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn i16_le(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn i32_le(bytes: &[u8], offset: usize) -> i32 {
    u32_le(bytes, offset) as i32
}

/// 32-bit value sent as two little-endian words, high word first
/// (KingSong and Veteran distance counters).
pub fn u32_swapped_words(bytes: &[u8], offset: usize) -> u32 {
    ((u16_le(bytes, offset) as u32) << 16) | u16_le(bytes, offset + 2) as u32
}

/// Two big-endian words, low word first.
pub fn u32_be_low_word_first(bytes: &[u8], offset: usize) -> u32 {
    ((u16_be(bytes, offset + 2) as u32) << 16) | u16_be(bytes, offset) as u32
}

/// Printable ASCII up to the first NUL.
pub fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|b| *b as char)
        .collect::<String>()
        .trim()
        .to_string()
}
