//! HyperLogLog++ cardinality estimator with a sparse start.
//!
//! Small sets are kept exactly as a set of full 64-bit hashes. Once the
//! set grows past `m / 4` entries every stored hash is replayed into the
//! dense register array and the sparse set is dropped for good. Keeping
//! full hashes (not 32-bit fingerprints) means promotion yields exactly
//! the registers dense mode would have produced from the start.
//!
//! Dense update for hash `h` with precision `p`:
//! `index = h >> (64 - p)`, `rank = 1 + clz(h << p)`,
//! `reg[index] = max(reg[index], rank)`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SketchError, SketchResult};
use crate::hash::hash64;

/// Smallest supported precision.
pub const MIN_PRECISION: u8 = 4;
/// Largest supported precision.
pub const MAX_PRECISION: u8 = 16;

/// Configuration for a [`HyperLogLog`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperLogLogConfig {
    /// Number of index bits `p`; the sketch has `2^p` registers (default 14).
    pub precision: u8,
    /// Start in exact sparse mode (default true).
    pub sparse: bool,
}

impl Default for HyperLogLogConfig {
    fn default() -> Self {
        Self {
            precision: 14,
            sparse: true,
        }
    }
}

impl HyperLogLogConfig {
    /// Rejects precisions outside `[4, 16]`.
    pub fn validate(&self) -> SketchResult<()> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.precision) {
            return Err(SketchError::InvalidArgument(format!(
                "precision must be in [{}, {}], got {}",
                MIN_PRECISION, MAX_PRECISION, self.precision
            )));
        }
        Ok(())
    }
}

/// Largest rank a register can hold: `64 - p + 1` with the smallest `p`.
const RANK_SCALE: u32 = 64 - MIN_PRECISION as u32 + 1;

/// Dense registers plus running totals so an estimate costs O(1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Registers {
    regs: Vec<u8>,
    /// `Σ 2^(RANK_SCALE - reg)`, kept exact in integer form.
    scaled_sum: u128,
    zeros: usize,
}

impl Registers {
    fn new(precision: u8) -> Self {
        let m = 1usize << precision;
        Self {
            regs: vec![0; m],
            scaled_sum: (m as u128) << RANK_SCALE,
            zeros: m,
        }
    }

    /// Applies one hash. Returns true when a register grew.
    fn update(&mut self, precision: u8, hash: u64) -> bool {
        let p = u32::from(precision);
        let index = (hash >> (64 - p)) as usize;
        let max_rank = 64 - p + 1;
        let rank = ((hash << p).leading_zeros() + 1).min(max_rank) as u8;
        self.raise(index, rank)
    }

    fn raise(&mut self, index: usize, rank: u8) -> bool {
        let old = self.regs[index];
        if rank <= old {
            return false;
        }
        self.scaled_sum -= 1u128 << (RANK_SCALE - u32::from(old));
        self.scaled_sum += 1u128 << (RANK_SCALE - u32::from(rank));
        if old == 0 {
            self.zeros -= 1;
        }
        self.regs[index] = rank;
        true
    }

    /// Raw HLL estimate with small-range linear counting.
    ///
    /// With 64-bit hashes the classic large-range correction for 32-bit
    /// hash saturation does not apply.
    fn estimate(&self) -> u64 {
        let m = self.regs.len() as f64;
        let sum = self.scaled_sum as f64 / (1u64 << RANK_SCALE) as f64;
        let raw = alpha(self.regs.len()) * m * m / sum;
        let e = if raw <= 2.5 * m && self.zeros > 0 {
            m * (m / self.zeros as f64).ln()
        } else {
            raw
        };
        e.round() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Repr {
    Sparse(HashSet<u64>),
    Dense(Registers),
}

/// Cardinality estimator. Single writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperLogLog {
    precision: u8,
    repr: Repr,
    /// Largest count reported since the sketch went dense.
    high_water: u64,
}

impl HyperLogLog {
    /// Creates an empty estimator.
    pub fn new(config: HyperLogLogConfig) -> SketchResult<Self> {
        config.validate()?;
        let repr = if config.sparse {
            Repr::Sparse(HashSet::new())
        } else {
            Repr::Dense(Registers::new(config.precision))
        };
        Ok(Self {
            precision: config.precision,
            repr,
            high_water: 0,
        })
    }

    /// Sparse estimator with precision `p`.
    pub fn with_precision(precision: u8) -> SketchResult<Self> {
        Self::new(HyperLogLogConfig {
            precision,
            sparse: true,
        })
    }

    /// Number of registers `m = 2^p`.
    pub fn register_count(&self) -> usize {
        1 << self.precision
    }

    /// Index bits `p`.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Sparse set size above which the sketch switches to registers.
    pub fn sparse_threshold(&self) -> usize {
        self.register_count() / 4
    }

    /// True while the exact sparse set is in use.
    pub fn is_sparse(&self) -> bool {
        matches!(self.repr, Repr::Sparse(_))
    }

    /// Register array once dense; `None` while sparse.
    pub fn registers(&self) -> Option<&[u8]> {
        match &self.repr {
            Repr::Dense(dense) => Some(&dense.regs),
            Repr::Sparse(_) => None,
        }
    }

    /// Adds an item by hashing its bytes.
    pub fn add(&mut self, item: impl AsRef<[u8]>) {
        self.add_hash(hash64(item.as_ref()));
    }

    /// Adds an already-hashed item.
    pub fn add_hash(&mut self, hash: u64) {
        let threshold = self.sparse_threshold();
        match &mut self.repr {
            Repr::Sparse(set) => {
                set.insert(hash);
                if set.len() > threshold {
                    self.promote();
                }
            }
            Repr::Dense(dense) => {
                if dense.update(self.precision, hash) {
                    self.high_water = self.high_water.max(dense.estimate());
                }
            }
        }
    }

    /// Replays every sparse hash into registers. No-op when already dense.
    fn promote(&mut self) {
        let Repr::Sparse(set) = &self.repr else {
            return;
        };
        let mut dense = Registers::new(self.precision);
        for &hash in set {
            dense.update(self.precision, hash);
        }
        self.high_water = self
            .high_water
            .max(set.len() as u64)
            .max(dense.estimate());
        debug!(
            precision = self.precision,
            sparse_len = set.len(),
            "promoted hyperloglog to dense registers"
        );
        self.repr = Repr::Dense(dense);
    }

    /// Estimated number of distinct items added.
    ///
    /// Exact while sparse. Once dense, the largest estimate seen so far is
    /// reported, so the count never goes down as items are added or merged.
    /// In particular it never drops below the exact count at promotion.
    pub fn count(&self) -> u64 {
        match &self.repr {
            Repr::Sparse(set) => set.len() as u64,
            Repr::Dense(_) => self.high_water,
        }
    }

    /// Folds `other` into `self`. Precisions must match.
    pub fn merge(&mut self, other: &HyperLogLog) -> SketchResult<()> {
        if self.precision != other.precision {
            return Err(SketchError::InvalidArgument(format!(
                "cannot merge hyperloglog with p={} into p={}",
                other.precision, self.precision
            )));
        }
        match &other.repr {
            Repr::Sparse(theirs) => {
                for &hash in theirs {
                    self.add_hash(hash);
                }
            }
            Repr::Dense(theirs) => {
                self.promote();
                if let Repr::Dense(mine) = &mut self.repr {
                    for (index, &rank) in theirs.regs.iter().enumerate() {
                        mine.raise(index, rank);
                    }
                    self.high_water = self.high_water.max(mine.estimate());
                }
            }
        }
        if !self.is_sparse() {
            self.high_water = self.high_water.max(other.count());
        }
        Ok(())
    }
}

fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}
