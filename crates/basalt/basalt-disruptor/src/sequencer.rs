//! Claim/publish arbitration over a power-of-two index space.
//!
//! Both sequencers gate claims on a [`Barrier`] whose dependencies are the
//! slowest consumers of the topology. A claim of `n` positions waits until
//!
//! ```text
//! (highest claimed position) - capacity <= minimum consumer position
//! ```
//!
//! - [`Spmc`]: one producer. The barrier's own sequence is the published
//!   cursor and the claim cursor is producer-local.
//! - [`Mpmc`]: many producers. The barrier's own sequence is the shared claim
//!   cursor and every position carries a published flag, so producers may
//!   complete disjoint ranges out of order.
//!
//! `claim` returns the end (exclusive) of the claimed range: a single claim
//! owns `claim(1) - 1`.

use crate::barrier::{Barrier, Offsets, Storage};
use crate::error::{DisruptorError, Result};
use crate::group::Group;
use crate::sequence::Sequence;
use crate::wait::{Spinner, WaitStrategy};
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};

/// Published flags scanned per `is_available_next` call: one cache line.
pub const FLAGS_PER_SCAN: i64 = 64 / size_of::<AtomicI64>() as i64;

/// Producer side of a sequencer.
pub trait Produce: Send + Sync {
    /// Free room in the ring.
    fn available(&self) -> usize;
    /// First position the next claim would return.
    fn next(&self) -> i64;
    /// Reserves `amount` positions (capped at capacity), blocking until the
    /// gating consumers make room. Returns the exclusive end.
    fn claim(&self, amount: usize) -> i64;
    /// Like [`claim`](Self::claim) but returns [`Sequence::INITIAL`] instead of
    /// blocking.
    fn try_claim(&self, amount: usize) -> i64;
    fn publish(&self, seq: i64);
    /// Publishes `[lo, hi)`.
    fn publish_range(&self, lo: i64, hi: i64);
}

/// A sequencer: producer side plus what consumers of it need.
pub trait Sequencer: Produce {
    type Wait: WaitStrategy;
    type Storage: Storage;

    /// Barrier gating the producers.
    fn barrier(&self) -> &Barrier<Self::Storage>;
    fn wait_strategy(&self) -> &Self::Wait;
    fn capacity(&self) -> usize;

    fn cursor(&self) -> &Sequence {
        self.barrier().cursor()
    }

    fn last(&self) -> i64 {
        self.barrier().last()
    }

    fn published(&self, seq: i64) -> bool;
    /// Blocks until `seq` is published; returns the highest position that is
    /// consumable right away.
    fn consume(&self, seq: i64) -> i64;
    /// Non-blocking probe: like [`consume`](Self::consume) or
    /// [`Sequence::INITIAL`] when `seq` is not published.
    fn consumable(&self, seq: i64) -> i64;

    fn add(&self, seq: &Sequence) -> bool {
        self.barrier().add(seq)
    }

    fn del(&self, seq: &Sequence) -> bool {
        self.barrier().del(seq)
    }

    fn replace(&self, removable: &Group, desired: *const Sequence) -> bool {
        self.barrier().replace(removable, desired)
    }

    fn dependencies(&self) -> Group {
        self.barrier().dependencies()
    }

    /// Re-reads the claim position from the shared cursor before a new
    /// producer takes over.
    fn resume(&self) {}
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity.is_power_of_two() {
        Ok(())
    } else {
        Err(DisruptorError::NotPowerOfTwo {
            what: "capacity",
            value: capacity,
        })
    }
}

/// Single producer, many consumers.
pub struct Spmc<'a, W, S: Storage = Offsets> {
    barrier: &'a Barrier<S>,
    wait: &'a W,
    capacity: usize,
    // Claim cursor; only the single producer writes it.
    next: AtomicI64,
}

impl<'a, W: WaitStrategy, S: Storage> Spmc<'a, W, S> {
    /// Claims resume right after the barrier's published cursor, so a
    /// sequencer attached to a live region continues its numbering.
    pub fn new(barrier: &'a Barrier<S>, capacity: usize, wait: &'a W) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            barrier,
            wait,
            capacity,
            next: AtomicI64::new(barrier.last() + 1),
        })
    }
}

impl<W: WaitStrategy, S: Storage> Produce for Spmc<'_, W, S> {
    fn available(&self) -> usize {
        let next = self.next();
        let consumed = self.barrier.minimum_sequence(next - 1);
        (self.capacity as i64 - (next - consumed) + 1) as usize
    }

    #[inline]
    fn next(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    fn claim(&self, amount: usize) -> i64 {
        let amount = amount.min(self.capacity) as i64;
        let next = self.next() + amount;
        let wrap = next - 1 - self.capacity as i64;
        self.wait.wait(wrap, self.barrier);
        self.next.store(next, Ordering::Relaxed);
        next
    }

    #[inline]
    fn try_claim(&self, amount: usize) -> i64 {
        let amount = amount.min(self.capacity) as i64;
        let next = self.next() + amount;
        let wrap = next - 1 - self.capacity as i64;
        if wrap > self.barrier.minimum_sequence(Sequence::MAX) {
            return Sequence::INITIAL;
        }
        self.next.store(next, Ordering::Relaxed);
        next
    }

    #[inline]
    fn publish(&self, seq: i64) {
        self.barrier.release(seq);
        self.wait.signal_all_when_blocking();
    }

    #[inline]
    fn publish_range(&self, _lo: i64, hi: i64) {
        self.publish(hi - 1);
    }
}

impl<W: WaitStrategy, S: Storage> Sequencer for Spmc<'_, W, S> {
    type Wait = W;
    type Storage = S;

    fn barrier(&self) -> &Barrier<S> {
        self.barrier
    }

    fn wait_strategy(&self) -> &W {
        self.wait
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn resume(&self) {
        self.next.store(self.barrier.last() + 1, Ordering::Relaxed);
    }

    #[inline]
    fn published(&self, seq: i64) -> bool {
        seq <= self.barrier.last()
    }

    #[inline]
    fn consume(&self, seq: i64) -> i64 {
        self.wait.wait(seq, self.barrier.cursor())
    }

    #[inline]
    fn consumable(&self, seq: i64) -> i64 {
        let published = self.barrier.last();
        if seq <= published {
            published
        } else {
            Sequence::INITIAL
        }
    }
}

enum Flags<'a> {
    Owned(Box<[AtomicI64]>),
    Borrowed(&'a [AtomicI64]),
}

impl Deref for Flags<'_> {
    type Target = [AtomicI64];

    fn deref(&self) -> &[AtomicI64] {
        match self {
            Flags::Owned(flags) => flags,
            Flags::Borrowed(flags) => flags,
        }
    }
}

/// Many producers, many consumers.
pub struct Mpmc<'a, W, S: Storage = Offsets> {
    barrier: &'a Barrier<S>,
    wait: &'a W,
    capacity: usize,
    mask: i64,
    published: Flags<'a>,
}

impl<'a, W: WaitStrategy, S: Storage> Mpmc<'a, W, S> {
    /// Sequencer with its own published flags.
    pub fn new(barrier: &'a Barrier<S>, capacity: usize, wait: &'a W) -> Result<Self> {
        check_capacity(capacity)?;
        let flags = (0..capacity)
            .map(|_| AtomicI64::new(Sequence::INITIAL))
            .collect();
        Ok(Self {
            barrier,
            wait,
            capacity,
            mask: capacity as i64 - 1,
            published: Flags::Owned(flags),
        })
    }

    /// Sequencer over caller-provided published flags, one per position.
    ///
    /// The flags are used as they are: a fresh region must hold
    /// [`Sequence::INITIAL`] everywhere, an attached one keeps its history.
    pub fn with_storage(
        barrier: &'a Barrier<S>,
        capacity: usize,
        wait: &'a W,
        published: &'a [AtomicI64],
    ) -> Result<Self> {
        check_capacity(capacity)?;
        if published.len() != capacity {
            return Err(DisruptorError::ExternalStorage {
                size: published.len(),
                capacity,
            });
        }
        Ok(Self {
            barrier,
            wait,
            capacity,
            mask: capacity as i64 - 1,
            published: Flags::Borrowed(published),
        })
    }

    #[inline(always)]
    fn flag(&self, seq: i64) -> &AtomicI64 {
        &self.published[(seq & self.mask) as usize]
    }

    /// Marks one position published.
    #[inline]
    pub fn set_available(&self, seq: i64) {
        let flag = self.flag(seq);
        debug_assert!(
            {
                let previous = flag.load(Ordering::Relaxed);
                previous == Sequence::INITIAL || previous == seq - self.capacity as i64
            },
            "position {seq} published twice"
        );
        flag.store(seq, Ordering::Release);
    }

    /// Highest position of the contiguous published run that starts right
    /// after `last_known`, scanning at most to the end of its cache line of
    /// flags.
    pub fn is_available_next(&self, last_known: i64) -> i64 {
        let limit = last_known | (FLAGS_PER_SCAN - 1);
        let mut seq = last_known + 1;
        while seq <= limit {
            if !self.published(seq) {
                return seq - 1;
            }
            seq += 1;
        }
        limit
    }
}

impl<W: WaitStrategy, S: Storage> Produce for Mpmc<'_, W, S> {
    fn available(&self) -> usize {
        let next = self.next();
        let consumed = self.barrier.minimum_sequence(next - 1);
        (self.capacity as i64 - (next - consumed) + 1) as usize
    }

    #[inline]
    fn next(&self) -> i64 {
        self.barrier.last() + 1
    }

    #[inline]
    fn claim(&self, amount: usize) -> i64 {
        let amount = amount.min(self.capacity) as i64;
        let current = self.barrier.cursor().add(amount) + 1;
        let next = current + amount;
        let wrap = next - 1 - self.capacity as i64;
        let mut spinner = Spinner::new();
        while wrap > self.barrier.minimum_sequence(current) {
            spinner.once();
        }
        next
    }

    #[inline]
    fn try_claim(&self, amount: usize) -> i64 {
        let amount = amount.min(self.capacity) as i64;
        let cursor = self.barrier.cursor();
        loop {
            let current = cursor.load();
            let next = current + amount;
            let wrap = next - self.capacity as i64;
            if wrap > self.barrier.minimum_sequence(Sequence::MAX) {
                return Sequence::INITIAL;
            }
            if cursor.cas(current, next) {
                return next + 1;
            }
        }
    }

    #[inline]
    fn publish(&self, seq: i64) {
        self.set_available(seq);
        self.wait.signal_all_when_blocking();
    }

    #[inline]
    fn publish_range(&self, lo: i64, hi: i64) {
        for seq in lo..hi {
            self.set_available(seq);
        }
        self.wait.signal_all_when_blocking();
    }
}

impl<W: WaitStrategy, S: Storage> Sequencer for Mpmc<'_, W, S> {
    type Wait = W;
    type Storage = S;

    fn barrier(&self) -> &Barrier<S> {
        self.barrier
    }

    fn wait_strategy(&self) -> &W {
        self.wait
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn published(&self, seq: i64) -> bool {
        self.flag(seq).load(Ordering::Acquire) == seq
    }

    #[inline]
    fn consume(&self, seq: i64) -> i64 {
        if !self.published(seq) {
            self.wait.wait(seq, self.flag(seq));
        }
        self.is_available_next(seq)
    }

    #[inline]
    fn consumable(&self, seq: i64) -> i64 {
        if self.published(seq) {
            self.is_available_next(seq)
        } else {
            Sequence::INITIAL
        }
    }
}
