//! MurmurHash64A

/// Seed used for ring positions
pub const RING_SEED: u32 = 0x1234_ABCD;

const M: u64 = 0xc6a4_a793_5bd1_e995;
const R: u32 = 47;

/// 64-bit MurmurHash2 (variant A), little-endian block reads
pub fn murmur64a(data: &[u8], seed: u32) -> u64 {
    let mut h = (seed as u64) ^ (data.len() as u64).wrapping_mul(M);

    let mut blocks = data.chunks_exact(8);
    for block in &mut blocks {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(block);
        let mut k = u64::from_le_bytes(buf);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        for (i, &byte) in tail.iter().enumerate() {
            h ^= (byte as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Ring position of `data`: the hash read as a signed integer
pub fn ring_hash(data: &[u8]) -> i64 {
    murmur64a(data, RING_SEED) as i64
}
