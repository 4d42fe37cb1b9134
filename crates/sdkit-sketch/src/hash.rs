//! Non-cryptographic hashing shared by the probabilistic sketches.

use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Seed for the second Count-Min hash.
const SECONDARY_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// 64-bit xxh3 of `data`.
#[inline]
pub fn hash64(data: &[u8]) -> u64 {
    xxh3_64(data)
}

/// Two independent 64-bit hashes for double hashing.
///
/// The second is forced odd so `h1 + r * h2` visits distinct columns
/// whenever the width is a power of two.
#[inline]
pub fn hash_pair(data: &[u8]) -> (u64, u64) {
    (xxh3_64(data), xxh3_64_with_seed(data, SECONDARY_SEED) | 1)
}
