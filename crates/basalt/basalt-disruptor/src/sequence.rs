//! Cache-line isolated 64-bit position counters.
//!
//! A [`Sequence`] marks the progress of one producer or consumer. Positions
//! start at [`Sequence::INITIAL`] (`-1`, nothing claimed or consumed yet) and
//! only move forward once published.
//!
//! # Memory Ordering
//!
//! - `store()` is a `Release` and `load()` an `Acquire`. This pair is the only
//!   synchronization edge between a producer publishing and a consumer
//!   observing, both across threads and across processes.
//! - `add()` and `cas()` are `Relaxed`. They arbitrate slot ranges between
//!   producers, where exclusivity comes from the claim algorithm itself.

use std::sync::atomic::{AtomicI64, Ordering};

/// A monotonically increasing position, padded to its own cache line.
///
/// # Memory Layout
///
/// ```text
/// ┌──────────────────────────────────────────────┐
/// │ value: AtomicI64 (8B) │ padding (56B)        │
/// └──────────────────────────────────────────────┘
/// ```
#[repr(C, align(64))]
#[derive(Debug)]
pub struct Sequence {
    value: AtomicI64,
}

impl Sequence {
    /// Position before anything has been claimed or consumed.
    pub const INITIAL: i64 = -1;
    /// Upper bound reported when nothing gates progress.
    pub const MAX: i64 = i64::MAX;

    pub const fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    #[inline(always)]
    pub fn load(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn store(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Adds `increment` and returns the previous value.
    #[inline(always)]
    pub fn add(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::Relaxed)
    }

    /// Weak compare-and-swap; may fail spuriously, callers loop.
    #[inline(always)]
    pub fn cas(&self, expected: i64, desired: i64) -> bool {
        self.value
            .compare_exchange_weak(expected, desired, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(Self::INITIAL)
    }
}

/// Anything a wait strategy can block on: a single position or the minimum
/// over a set of dependencies.
pub trait Gate {
    /// The highest position every gating party has reached.
    fn position(&self) -> i64;
}

impl Gate for Sequence {
    #[inline(always)]
    fn position(&self) -> i64 {
        self.load()
    }
}

/// Per-slot published flags of the multi-producer sequencer.
impl Gate for AtomicI64 {
    #[inline(always)]
    fn position(&self) -> i64 {
        self.load(Ordering::Acquire)
    }
}
