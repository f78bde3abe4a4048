//! Key to hash slot mapping
//!
//! `slot = CRC16-XMODEM(tag or key) mod 16384`, where the tag is the
//! non-empty substring between the first `{` and the next `}` after it.

/// Number of hash slots in a cluster
pub const SLOT_COUNT: usize = 16384;

/// CRC16 implementation for cluster slot calculation (XMODEM, poly 0x1021)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// The bytes that decide a key's placement: its hash tag if it has a
/// non-empty one, otherwise the whole key.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// Slot for a key, always in `0..16384`
pub fn slot_for_key(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT as u16
}
