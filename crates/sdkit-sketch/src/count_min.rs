//! Count-Min sketch: frequency estimation with one-sided error.
//!
//! For accuracy `epsilon` and confidence `delta` the table is
//! `width = ceil(e / epsilon)` columns by `depth = ceil(ln(1 / (1 - delta)))`
//! rows. Estimates never undercount; with probability at least `delta`
//! they overcount by at most `epsilon * total`.
//!
//! Single writer. Wrap in a lock if several threads add concurrently.

use serde::{Deserialize, Serialize};

use crate::error::{SketchError, SketchResult};
use crate::hash::hash_pair;

/// Accuracy parameters for a [`CountMinSketch`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CountMinConfig {
    /// Relative error bound as a fraction of the total count (default 0.001).
    pub epsilon: f64,
    /// Probability that an estimate stays within the bound (default 0.99).
    pub delta: f64,
}

impl Default for CountMinConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            delta: 0.99,
        }
    }
}

impl CountMinConfig {
    /// Rejects parameters outside the open interval (0, 1).
    pub fn validate(&self) -> SketchResult<()> {
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(SketchError::InvalidArgument(format!(
                "epsilon must be in (0, 1), got {}",
                self.epsilon
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(SketchError::InvalidArgument(format!(
                "delta must be in (0, 1), got {}",
                self.delta
            )));
        }
        Ok(())
    }

    /// Table dimensions `(width, depth)` implied by these parameters.
    pub fn dimensions(&self) -> (usize, usize) {
        let width = (std::f64::consts::E / self.epsilon).ceil() as usize;
        let depth = (1.0 / (1.0 - self.delta)).ln().ceil() as usize;
        (width.max(1), depth.max(1))
    }
}

/// A `depth x width` table of counters plus the running total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    table: Vec<u64>,
    total: u64,
}

impl CountMinSketch {
    /// Builds a sketch sized for the given accuracy.
    pub fn new(config: CountMinConfig) -> SketchResult<Self> {
        config.validate()?;
        let (width, depth) = config.dimensions();
        Self::with_dimensions(width, depth)
    }

    /// Builds a sketch with an explicit table shape.
    pub fn with_dimensions(width: usize, depth: usize) -> SketchResult<Self> {
        if width == 0 || depth == 0 {
            return Err(SketchError::InvalidArgument(format!(
                "count-min dimensions must be non-zero, got {}x{}",
                width, depth
            )));
        }
        Ok(Self {
            width,
            depth,
            table: vec![0; width * depth],
            total: 0,
        })
    }

    fn columns(&self, key: &[u8]) -> impl Iterator<Item = usize> {
        let (h1, h2) = hash_pair(key);
        let width = self.width;
        (0..self.depth).map(move |row| {
            let col = h1.wrapping_add((row as u64).wrapping_mul(h2)) % width as u64;
            row * width + col as usize
        })
    }

    /// Records `count` occurrences of `key`.
    pub fn add(&mut self, key: impl AsRef<[u8]>, count: u64) {
        self.total = self.total.saturating_add(count);
        for cell in self.columns(key.as_ref()) {
            self.table[cell] = self.table[cell].saturating_add(count);
        }
    }

    /// Records a single occurrence of `key`.
    pub fn increment(&mut self, key: impl AsRef<[u8]>) {
        self.add(key, 1);
    }

    /// Minimum counter across rows: never below the true count.
    pub fn estimate(&self, key: impl AsRef<[u8]>) -> u64 {
        self.columns(key.as_ref())
            .map(|cell| self.table[cell])
            .min()
            .unwrap_or(0)
    }

    /// Adds `other` cell by cell. Both sketches must share `(width, depth)`.
    pub fn merge(&mut self, other: &CountMinSketch) -> SketchResult<()> {
        if self.width != other.width || self.depth != other.depth {
            return Err(SketchError::InvalidArgument(format!(
                "cannot merge {}x{} sketch into {}x{}",
                other.width, other.depth, self.width, self.depth
            )));
        }
        for (mine, theirs) in self.table.iter_mut().zip(&other.table) {
            *mine = mine.saturating_add(*theirs);
        }
        self.total = self.total.saturating_add(other.total);
        Ok(())
    }

    /// Sum of every count added.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Effective epsilon of this table (`e / width`).
    pub fn epsilon(&self) -> f64 {
        std::f64::consts::E / self.width as f64
    }

    /// Maximum expected overcount at the configured confidence.
    pub fn error_bound(&self) -> f64 {
        self.epsilon() * self.total as f64
    }

    /// Zeroes every counter.
    pub fn clear(&mut self) {
        self.table.iter_mut().for_each(|c| *c = 0);
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fruit_sketch() -> CountMinSketch {
        CountMinSketch::new(CountMinConfig {
            epsilon: 0.01,
            delta: 0.99,
        })
        .unwrap()
    }

    #[test]
    fn test_dimensions_from_parameters() {
        let sketch = fruit_sketch();
        assert_eq!(sketch.width(), 272);
        assert_eq!(sketch.depth(), 5);
    }

    #[test]
    fn test_fruit_scenario() {
        let mut sketch = fruit_sketch();
        sketch.increment("apple");
        sketch.increment("apple");
        sketch.increment("banana");
        let apple = sketch.estimate("apple");
        assert!(apple >= 2);
        assert!(apple as f64 <= 2.0 + 0.01 * 3.0);
        assert_eq!(sketch.estimate("cherry"), 0);
        assert_eq!(sketch.total(), 3);
    }

    #[test]
    fn test_add_with_count() {
        let mut sketch = CountMinSketch::with_dimensions(64, 4).unwrap();
        sketch.add(b"key", 10);
        sketch.add(b"key", 5);
        assert_eq!(sketch.estimate(b"key"), 15);
    }

    #[test]
    fn test_merge_sums_tables() {
        let mut a = fruit_sketch();
        let mut b = fruit_sketch();
        a.add("x", 3);
        b.add("x", 4);
        b.add("y", 1);
        a.merge(&b).unwrap();
        assert_eq!(a.estimate("x"), 7);
        assert_eq!(a.total(), 8);
    }

    #[test]
    fn test_merge_rejects_mismatched_shapes() {
        let mut a = CountMinSketch::with_dimensions(64, 4).unwrap();
        let b = CountMinSketch::with_dimensions(32, 4).unwrap();
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, SketchError::InvalidArgument(ref msg) if msg.contains("32x4")));
    }

    #[test]
    fn test_invalid_parameters() {
        for (epsilon, delta) in [(0.0, 0.5), (1.0, 0.5), (0.1, 0.0), (0.1, 1.0)] {
            let err = CountMinSketch::new(CountMinConfig { epsilon, delta }).unwrap_err();
            assert!(matches!(err, SketchError::InvalidArgument(_)));
        }
        assert!(CountMinSketch::with_dimensions(0, 3).is_err());
    }

    #[test]
    fn test_clear() {
        let mut sketch = fruit_sketch();
        sketch.add("k", 9);
        sketch.clear();
        assert_eq!(sketch.estimate("k"), 0);
        assert_eq!(sketch.total(), 0);
    }
}
