//! Probabilistic membership filter for partition keys.
//!
//! False positives only: a `false` from [`BloomFilter::might_contain`] proves
//! the key is absent, which lets the reader rule a partition out before any
//! index-file byte is consulted.

/// Salt appended to the key for the second hash of the double-hashing
/// scheme.
const SECOND_HASH_SALT: u8 = 0xC5;

/// Fixed-size bit array with double hashing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// Build an empty filter sized for roughly `expected_keys` entries at a
    /// ~1% false-positive rate.
    pub fn with_capacity(expected_keys: usize) -> Self {
        // ~9.6 bits per key and 7 hash rounds approximate a 1% rate.
        let num_bits = (expected_keys.max(1) * 10).next_multiple_of(8);
        Self {
            bits: vec![0u8; num_bits / 8],
            num_bits,
            num_hashes: 7,
        }
    }

    /// Rebuild a filter from its serialized parts.
    pub fn from_parts(bits: Vec<u8>, num_bits: usize, num_hashes: u32) -> Option<Self> {
        if num_bits == 0 || num_hashes == 0 || bits.len() * 8 < num_bits {
            return None;
        }
        Some(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    /// Record `key` as present.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hashes(key);
        for round in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, round);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Whether `key` may be present. `false` is authoritative.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hashes(key);
        (0..self.num_hashes).all(|round| {
            let bit = self.bit_index(h1, h2, round);
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// Serialized bit array.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Number of addressable bits.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Hash rounds per key.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn bit_index(&self, h1: u32, h2: u32, round: u32) -> usize {
        let combined = h1.wrapping_add(round.wrapping_mul(h2));
        combined as usize % self.num_bits
    }

    fn hashes(key: &[u8]) -> (u32, u32) {
        let h1 = crc32fast::hash(key);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(key);
        hasher.update(&[SECOND_HASH_SALT]);
        (h1, hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::BloomFilter;

    #[test]
    fn inserted_keys_are_found() {
        let mut filter = BloomFilter::with_capacity(64);
        for i in 0..64u32 {
            filter.insert(&i.to_le_bytes());
        }
        for i in 0..64u32 {
            assert!(filter.might_contain(&i.to_le_bytes()));
        }
    }

    #[test]
    fn absent_keys_are_mostly_rejected() {
        let mut filter = BloomFilter::with_capacity(128);
        for i in 0..128u32 {
            filter.insert(&i.to_le_bytes());
        }
        let false_positives = (1000..2000u32)
            .filter(|i| filter.might_contain(&i.to_le_bytes()))
            .count();
        // 1% target rate with generous headroom for hash quality.
        assert!(false_positives < 100, "{false_positives} false positives");
    }

    #[test]
    fn round_trips_through_parts() {
        let mut filter = BloomFilter::with_capacity(8);
        filter.insert(b"alpha");
        let rebuilt = BloomFilter::from_parts(
            filter.bits().to_vec(),
            filter.num_bits(),
            filter.num_hashes(),
        )
        .unwrap();
        assert!(rebuilt.might_contain(b"alpha"));
        assert_eq!(filter, rebuilt);
    }

    #[test]
    fn rejects_inconsistent_parts() {
        assert!(BloomFilter::from_parts(vec![0u8; 1], 64, 7).is_none());
        assert!(BloomFilter::from_parts(vec![0u8; 8], 0, 7).is_none());
    }
}
