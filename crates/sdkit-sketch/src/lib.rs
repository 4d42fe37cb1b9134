#![warn(missing_docs)]

//! sdkit sketch subsystem: hashing-based summaries of data streams.
//!
//! - [`MerkleTree`]: SHA-256 inclusion proofs over a fixed list of blocks.
//! - [`CountMinSketch`]: per-key frequency estimates that never undercount.
//! - [`HyperLogLog`]: distinct-count estimates, exact while small.
//!
//! All structures are single-writer; callers add their own locking.

pub mod count_min;
pub mod error;
pub mod hash;
pub mod hyperloglog;
pub mod merkle;

pub use count_min::{CountMinConfig, CountMinSketch};
pub use error::{SketchError, SketchResult};
pub use hyperloglog::{HyperLogLog, HyperLogLogConfig};
pub use merkle::{verify_proof, Hash, MerkleTree};
