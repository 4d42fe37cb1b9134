//! Single-producer single-consumer ring buffer.
//!
//! Slots are pre-allocated with `T::default()` and reused in place: the
//! producer fills a slot through a closure, the consumer reads (or takes)
//! it through another. Two monotonically increasing sequence counters,
//! each on its own cache line, coordinate the halves without locks.
//! Dropping either half disconnects the ring: blocking calls on the other
//! half return [`SchedError::Disconnected`] instead of waiting forever.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchedError, SchedResult};

/// Capacity used when the configured capacity is 0.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

const SPINS_BEFORE_YIELD: u32 = 64;

/// Ring buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Requested slot count. 0 selects the default; other values are
    /// rounded up to a power of two.
    pub capacity: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl RingConfig {
    /// Creates a config requesting `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// The slot count the ring will actually allocate.
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            self.capacity.next_power_of_two()
        }
    }
}

/// Pads and aligns a value to its own cache line.
#[repr(C, align(64))]
struct CacheAligned<T>(T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: u64,
    /// Number of slots published so far.
    published: CacheAligned<AtomicU64>,
    /// Number of slots consumed so far.
    consumed: CacheAligned<AtomicU64>,
    producer_gone: AtomicBool,
    consumer_gone: AtomicBool,
}

// SAFETY: a slot is only touched by the producer while
// `published - consumed < capacity` excludes the consumer from it, and only
// by the consumer after the producer's release store on `published`.
unsafe impl<T: Send> Sync for Shared<T> {}
unsafe impl<T: Send> Send for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> u64 {
        self.mask + 1
    }

    fn slot(&self, seq: u64) -> *mut T {
        self.slots[(seq & self.mask) as usize].get()
    }

    fn len(&self) -> usize {
        let consumed = self.consumed.load(Ordering::Acquire);
        let published = self.published.load(Ordering::Acquire);
        published.saturating_sub(consumed) as usize
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_YIELD {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

/// Creates a ring and splits it into its two halves.
pub fn channel<T: Default + Send>(config: RingConfig) -> (Producer<T>, Consumer<T>) {
    let capacity = config.effective_capacity();
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(T::default()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    debug!(capacity, "ring buffer allocated");
    let shared = Arc::new(Shared {
        slots,
        mask: capacity as u64 - 1,
        published: CacheAligned(AtomicU64::new(0)),
        consumed: CacheAligned(AtomicU64::new(0)),
        producer_gone: AtomicBool::new(false),
        consumer_gone: AtomicBool::new(false),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
            next: 0,
            cached_consumed: 0,
        },
        Consumer {
            shared,
            next: 0,
            cached_published: 0,
        },
    )
}

/// The publishing half. Not cloneable: exactly one producer exists.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    next: u64,
    cached_consumed: u64,
}

impl<T: Send> Producer<T> {
    fn has_room(&mut self) -> bool {
        if self.next - self.cached_consumed < self.shared.capacity() {
            return true;
        }
        self.cached_consumed = self.shared.consumed.load(Ordering::Acquire);
        self.next - self.cached_consumed < self.shared.capacity()
    }

    fn fill(&mut self, f: impl FnOnce(&mut T)) {
        // SAFETY: `has_room` established the consumer has finished with this
        // slot, and the consumer will not read it until the store below.
        let slot = unsafe { &mut *self.shared.slot(self.next) };
        f(slot);
        self.next += 1;
        self.shared.published.store(self.next, Ordering::Release);
    }

    /// Waits for a free slot, lets `f` fill it, then publishes it. Fails
    /// with `Disconnected` once the consumer has been dropped.
    pub fn publish(&mut self, f: impl FnOnce(&mut T)) -> SchedResult<()> {
        let mut spins = 0;
        loop {
            if self.shared.consumer_gone.load(Ordering::Acquire) {
                return Err(SchedError::Disconnected);
            }
            if self.has_room() {
                break;
            }
            backoff(&mut spins);
        }
        self.fill(f);
        Ok(())
    }

    /// Publishes only if a slot is free right now.
    pub fn try_publish(&mut self, f: impl FnOnce(&mut T)) -> bool {
        if !self.has_room() {
            return false;
        }
        self.fill(f);
        true
    }

    /// Sequence number the next publish will use.
    pub fn sequence(&self) -> u64 {
        self.next
    }

    /// Number of published but unconsumed slots.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// True when the consumer has caught up.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity() as usize
    }
}

/// The consuming half. Not cloneable: exactly one consumer exists.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    next: u64,
    cached_published: u64,
}

impl<T: Send> Consumer<T> {
    fn has_item(&mut self) -> bool {
        if self.next < self.cached_published {
            return true;
        }
        self.cached_published = self.shared.published.load(Ordering::Acquire);
        self.next < self.cached_published
    }

    fn drain_one<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: the acquire load in `has_item` observed the producer's
        // release of this slot, and the producer will not reuse it until the
        // store below.
        let slot = unsafe { &mut *self.shared.slot(self.next) };
        let out = f(slot);
        self.next += 1;
        self.shared.consumed.store(self.next, Ordering::Release);
        out
    }

    /// Waits for the next published slot and hands it to `f`. Slots
    /// published before the producer was dropped are still delivered; after
    /// that this fails with `Disconnected`.
    pub fn consume<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> SchedResult<R> {
        let mut spins = 0;
        while !self.has_item() {
            if self.shared.producer_gone.load(Ordering::Acquire) {
                // The producer's final release store precedes its drop flag.
                if self.has_item() {
                    break;
                }
                return Err(SchedError::Disconnected);
            }
            backoff(&mut spins);
        }
        Ok(self.drain_one(f))
    }

    /// Consumes only if a slot is published right now.
    pub fn try_consume<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if !self.has_item() {
            return None;
        }
        Some(self.drain_one(f))
    }

    /// Sequence number the next consume will read.
    pub fn sequence(&self) -> u64 {
        self.next
    }

    /// Number of published but unconsumed slots.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity() as usize
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.shared.producer_gone.store(true, Ordering::Release);
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.shared.consumer_gone.store(true, Ordering::Release);
    }
}
