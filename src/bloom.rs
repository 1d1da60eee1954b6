//! Per-segment bloom filter.
//!
//! One filter is built over all user keys of a segment and stored in the
//! segment's bloom block. It is consulted on point reads to skip data
//! blocks, and during compaction to decide whether a tombstone may be
//! dropped.
//!
//! Probes use double hashing seeded from the 32-bit key hash:
//! `h_i = h + i * rot15(h) (mod m)`.

use crate::hash::key_hash;

/// Name of the filter policy, referenced by the segment metaindex
pub const FILTER_POLICY_NAME: &str = "silt.BloomFilter";

/// Builds a filter over the given key hashes.
///
/// The layout is a bit array (little-endian within each byte) followed by
/// one byte holding the number of probes `k`.
#[must_use]
pub fn create_filter_from_hashes(hashes: &[u32], bits_per_key: u8) -> Vec<u8> {
    // k is chosen to minimize the false positive rate: bits_per_key * ln(2)
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let k = ((f64::from(bits_per_key) * std::f64::consts::LN_2).round() as u32).clamp(1, 30);

    let mut bits = hashes.len() * usize::from(bits_per_key);

    // Tiny filters have disproportionally high false positive rates
    bits = bits.max(64);

    let bytes = (bits + 7) / 8;
    bits = bytes * 8;

    let mut filter = vec![0u8; bytes + 1];

    for &hash in hashes {
        let mut h = hash;
        let delta = h.rotate_left(15);

        for _ in 0..k {
            let bit_pos = (h as usize) % bits;
            filter[bit_pos / 8] |= 1 << (bit_pos % 8);
            h = h.wrapping_add(delta);
        }
    }

    // NOTE: k <= 30
    #[allow(clippy::cast_possible_truncation)]
    {
        filter[bytes] = k as u8;
    }

    filter
}

/// Builds a filter over the given keys
#[must_use]
pub fn create_filter<K: AsRef<[u8]>>(keys: &[K], bits_per_key: u8) -> Vec<u8> {
    let hashes = keys
        .iter()
        .map(|key| key_hash(key.as_ref()))
        .collect::<Vec<_>>();

    create_filter_from_hashes(&hashes, bits_per_key)
}

/// Conservative membership test.
///
/// Returns `true` if `key` may have been in the filter's key set; `false`
/// guarantees it was not.
#[must_use]
pub fn may_match(filter: &[u8], key: &[u8]) -> bool {
    may_match_hash(filter, key_hash(key))
}

/// [`may_match`] for a precomputed key hash
#[must_use]
pub fn may_match_hash(filter: &[u8], hash: u32) -> bool {
    if filter.len() < 2 {
        return false;
    }

    let bits = (filter.len() - 1) * 8;
    let k = filter[filter.len() - 1];

    if k > 30 {
        // Reserved for future encodings: treat as a match
        return true;
    }

    let mut h = hash;
    let delta = h.rotate_left(15);

    for _ in 0..k {
        let bit_pos = (h as usize) % bits;
        if filter[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
            return false;
        }
        h = h.wrapping_add(delta);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn no_false_negatives() {
        let keys: &[&[u8]] = &[b"hello", b"world", b"lsm", b"engine"];
        let filter = create_filter(keys, 10);

        for key in keys {
            assert!(may_match(&filter, key), "{key:?} must match");
        }
    }

    #[test]
    fn false_positive_rate_under_two_percent() {
        let keys: &[&[u8]] = &[b"hello", b"world", b"lsm", b"engine"];
        let filter = create_filter(keys, 10);

        let mut false_positives = 0;
        for i in 0..10_000 {
            let probe = format!("miss-{i}");
            if may_match(&filter, probe.as_bytes()) {
                false_positives += 1;
            }
        }

        assert!(
            false_positives <= 200,
            "{false_positives} false positives out of 10000"
        );
    }

    #[test]
    fn empty_key_set() {
        let filter = create_filter::<&[u8]>(&[], 10);

        // Minimum filter size is 64 bits + the k byte
        assert_eq!(9, filter.len());
        assert!(!may_match(&filter, b"anything"));
    }

    #[test]
    fn larger_corpus() {
        let keys = (0..1_000).map(|i| format!("key{i:04}")).collect::<Vec<_>>();
        let filter = create_filter(&keys, 10);

        for key in &keys {
            assert!(may_match(&filter, key.as_bytes()));
        }

        let mut false_positives = 0;
        for i in 0..10_000 {
            let probe = format!("absent{i:05}");
            if may_match(&filter, probe.as_bytes()) {
                false_positives += 1;
            }
        }

        // ~1% expected for 10 bits per key
        assert!(false_positives < 300, "{false_positives}");
    }

    #[test]
    fn probe_count_is_clamped() {
        let filter = create_filter::<&[u8]>(&[b"a"], 255);
        assert_eq!(30, filter[filter.len() - 1]);

        let filter = create_filter::<&[u8]>(&[b"a"], 1);
        assert_eq!(1, filter[filter.len() - 1]);
    }

    #[test]
    fn empty_filter_slice_never_matches() {
        assert!(!may_match(&[], b"x"));
    }
}
