//! Bloom filter.
//!
//! Sized from the classic `(n, p)` formulas:
//!
//! ```text
//! m = ceil(-n * ln(p) / (ln 2)^2)      // bits
//! k = max(1, round(m * ln(2) / n))     // hash functions
//! ```
//!
//! The hash family is a seeded FNV-1a: `offset = 2166136261 XOR seed`,
//! `prime = 16777619`. `k` independent seeds (`0..k`) each produce one
//! index mod `m`. This is hand-rolled rather than built on an external
//! bloom-filter crate because the seeded-FNV family and the exact
//! `(m, k)` derivation are part of the on-disk contract — an external
//! crate's hash family wouldn't reproduce it.

use tracing::trace;

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

/// A probabilistic set-membership filter with no false negatives.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    m: u64,
    k: u32,
    p: f64,
}

impl BloomFilter {
    /// Builds an empty filter sized for `n` expected insertions at a
    /// target false-positive rate `p`.
    pub fn new(n: usize, p: f64) -> Self {
        let n = n.max(1);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n as f64) * p.ln() / (ln2 * ln2)).ceil().max(1.0) as u64;
        let k = ((m as f64 / n as f64) * ln2).round().max(1.0) as u32;
        let byte_len = (m as usize).div_ceil(8);
        BloomFilter {
            bits: vec![0u8; byte_len],
            m,
            k,
            p,
        }
    }

    /// Builds a filter already populated with `keys`, sized for
    /// `keys.len()` insertions.
    pub fn build<I, S>(keys: I, p: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let keys: Vec<S> = keys.into_iter().collect();
        let mut filter = Self::new(keys.len(), p);
        for key in &keys {
            filter.insert(key.as_ref());
        }
        filter
    }

    pub fn insert(&mut self, key: &[u8]) {
        for seed in 0..self.k {
            let idx = self.index_for(key, seed);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    /// Returns `false` only when `key` was definitely never inserted.
    /// May return `true` for a key that was never inserted with
    /// probability approximately `p`.
    pub fn contains(&self, key: &[u8]) -> bool {
        for seed in 0..self.k {
            let idx = self.index_for(key, seed);
            if self.bits[(idx / 8) as usize] & (1 << (idx % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn bit_count(&self) -> u64 {
        self.m
    }

    pub fn hash_count(&self) -> u32 {
        self.k
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.p
    }

    fn index_for(&self, key: &[u8], seed: u32) -> u64 {
        let offset = FNV_OFFSET_BASIS ^ seed;
        let mut hash = offset;
        for &byte in key {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        (hash as u64) % self.m
    }

    /// Serializes `{m, k, p, byte_length, bits}`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.m.to_le_bytes());
        buf.extend_from_slice(&self.k.to_le_bytes());
        buf.extend_from_slice(&self.p.to_le_bytes());
        buf.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.bits);
    }

    /// Deserializes a filter, requiring `m`/`k` to be internally
    /// consistent with the stored bit length.
    pub fn decode_from(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < 8 + 4 + 8 + 4 {
            return None;
        }
        let mut off = 0;
        let m = u64::from_le_bytes(buf[off..off + 8].try_into().ok()?);
        off += 8;
        let k = u32::from_le_bytes(buf[off..off + 4].try_into().ok()?);
        off += 4;
        let p = f64::from_le_bytes(buf[off..off + 8].try_into().ok()?);
        off += 8;
        let byte_len = u32::from_le_bytes(buf[off..off + 4].try_into().ok()?) as usize;
        off += 4;
        if buf.len() < off + byte_len {
            return None;
        }
        let expected_len = (m as usize).div_ceil(8);
        if byte_len != expected_len {
            trace!(m, byte_len, expected_len, "bloom filter byte length mismatch");
            return None;
        }
        let bits = buf[off..off + byte_len].to_vec();
        off += byte_len;
        Some((BloomFilter { bits, m, k, p }, off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_false_negative() {
        let keys: Vec<String> = (0..2000).map(|i| format!("key-{i}")).collect();
        let filter = BloomFilter::build(keys.iter().map(|k| k.as_bytes()), 0.01);
        for k in &keys {
            assert!(filter.contains(k.as_bytes()));
        }
    }

    #[test]
    fn false_positive_rate_within_2x() {
        let n = 5000;
        let p = 0.02;
        let keys: Vec<String> = (0..n).map(|i| format!("present-{i}")).collect();
        let filter = BloomFilter::build(keys.iter().map(|k| k.as_bytes()), p);

        let probes = n * 10;
        let mut false_positives = 0usize;
        for i in 0..probes {
            let absent = format!("absent-{i}");
            if filter.contains(absent.as_bytes()) {
                false_positives += 1;
            }
        }
        let empirical = false_positives as f64 / probes as f64;
        assert!(
            empirical <= p * 2.0,
            "empirical fpr {empirical} exceeds 2x target {p}"
        );
    }

    #[test]
    fn round_trip_serialization() {
        let filter = BloomFilter::build(["a", "b", "c"].iter().map(|s| s.as_bytes()), 0.05);
        let mut buf = Vec::new();
        filter.encode_to(&mut buf);
        let (decoded, consumed) = BloomFilter::decode_from(&buf).expect("decodes");
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.m, filter.m);
        assert_eq!(decoded.k, filter.k);
        assert!(decoded.contains(b"a"));
        assert!(decoded.contains(b"b"));
        assert!(decoded.contains(b"c"));
    }
}
