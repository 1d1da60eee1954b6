//! 32-bit key hash (`MurmurHash3` x86 variant).
//!
//! Used to derive bloom filter probes, so the output is part of the
//! sorted-file format and must stay stable.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// Seed for all key hashing inside the engine
pub const KEY_HASH_SEED: u32 = 0xbc9f_1d34;

/// Hashes a key with the engine-wide seed
#[must_use]
pub fn key_hash(data: &[u8]) -> u32 {
    hash(data, KEY_HASH_SEED)
}

/// `MurmurHash3` x86 32-bit
#[must_use]
pub fn hash(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        // NOTE: chunks_exact guarantees 4 bytes
        #[allow(clippy::expect_used)]
        let mut k = u32::from_le_bytes(chunk.try_into().expect("chunk should be 4 bytes"));

        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, byte) in tail.iter().enumerate() {
            k |= u32::from(*byte) << (8 * i);
        }

        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    // NOTE: Inputs are keys, they are always far below u32::MAX bytes
    #[allow(clippy::cast_possible_truncation)]
    {
        h ^= data.len() as u32;
    }

    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;

    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn murmur3_reference_vectors() {
        // Well-known MurmurHash3 x86_32 vectors
        assert_eq!(0, hash(b"", 0));
        assert_eq!(0xba6b_d213, hash(b"test", 0));
        assert_eq!(0xc036_3e43, hash(b"Hello, world!", 0));
    }

    #[test]
    fn deterministic() {
        assert_eq!(key_hash(b"some key"), key_hash(b"some key"));
    }

    #[test]
    fn tail_lengths_differ() {
        // Exercise the 1-, 2- and 3-byte tail paths
        let hashes = [
            key_hash(b"a"),
            key_hash(b"ab"),
            key_hash(b"abc"),
            key_hash(b"abcd"),
            key_hash(b"abcde"),
        ];

        for (i, a) in hashes.iter().enumerate() {
            for b in hashes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
