//! Bloom filter over bundle identity strings.
//!
//! Peers exchange summary vectors of the bundles they have already seen or
//! delivered; storage uses such a filter purely as an oracle for "might
//! this identity have been handled elsewhere" when purging. False positives
//! are possible, false negatives are not.

/// A bloom filter using double hashing (Kirsch-Mitzenmacher) over two
/// domain-separated BLAKE3 digests of the identity string.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` with the given
    /// false-positive rate (e.g. 0.01 = 1%).
    pub fn new(expected_items: usize, fp_rate: f64) -> Self {
        let expected_items = expected_items.max(1);
        let fp_rate = fp_rate.clamp(1e-10, 1.0);

        // Optimal number of bits: m = -n * ln(p) / (ln2)^2
        let num_bits = (-(expected_items as f64) * fp_rate.ln() / (2.0_f64.ln().powi(2)))
            .ceil() as usize;
        let num_bits = num_bits.max(64);

        // Optimal number of hashes: k = (m/n) * ln2
        let num_hashes = ((num_bits as f64 / expected_items as f64) * 2.0_f64.ln())
            .ceil() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        let words = num_bits.div_ceil(64);
        Self {
            bits: vec![0u64; words],
            num_bits,
            num_hashes,
        }
    }

    /// Insert an identity string into the filter.
    pub fn insert(&mut self, key: &str) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    /// Check whether an identity might be in the set. Returns `false` only
    /// when the identity is definitely not present.
    pub fn may_contain(&self, key: &str) -> bool {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            if self.bits[idx / 64] & (1u64 << (idx % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Number of bits in the filter.
    pub fn size_bits(&self) -> usize {
        self.num_bits
    }

    /// Serialize for exchange with peers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.bits.len() * 8);
        buf.extend_from_slice(&(self.num_bits as u32).to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Deserialize a filter received from a peer. Returns `None` for
    /// malformed input.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }
        let num_bits = u32::from_le_bytes(data[0..4].try_into().ok()?) as usize;
        let num_hashes = u32::from_le_bytes(data[4..8].try_into().ok()?);
        let word_count = u32::from_le_bytes(data[8..12].try_into().ok()?) as usize;
        if num_bits == 0 || num_hashes == 0 || data.len() < 12 + word_count * 8 {
            return None;
        }
        let mut bits = Vec::with_capacity(word_count);
        for i in 0..word_count {
            let offset = 12 + i * 8;
            bits.push(u64::from_le_bytes(data[offset..offset + 8].try_into().ok()?));
        }
        Some(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (combined % self.num_bits as u64) as usize
    }
}

/// Two independent 64-bit hashes from one domain-separated BLAKE3 digest.
fn hash_pair(key: &str) -> (u64, u64) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dtnd-bloom-v1:");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let h1 = u64::from_le_bytes(bytes[0..8].try_into().expect("digest is 32 bytes"));
    let h2 = u64::from_le_bytes(bytes[8..16].try_into().expect("digest is 32 bytes"));
    (h1, h2)
}
