//! Progress barriers: one node's own [`Sequence`] plus the upstream sequences
//! that gate it.
//!
//! The dependency set can be stored three ways, selected by the [`Storage`]
//! parameter of [`Barrier`]:
//!
//! | Storage      | Entry                | Use                                         |
//! |--------------|----------------------|---------------------------------------------|
//! | [`Pointers`] | address, relaxed     | single address space, wired before publish  |
//! | [`Atomics`]  | address, CAS         | single address space, rewired while running |
//! | [`Offsets`]  | byte offset, CAS     | position independent, shared memory         |
//!
//! # Memory Layout
//!
//! ```text
//! ┌───────────────────────────┬────────────────────────────────────────┐
//! │ last: Sequence (64B)      │ deps: 8 x 8B entries (64B)             │
//! └───────────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! `last` sits at offset 0. The graph layer relies on this to map a
//! dependency back to the slot that owns it.
//!
//! # Lifetime Contract
//!
//! Dependencies are weak: a barrier never owns the sequences it depends on.
//! Whoever wires a barrier keeps every dependency alive, and in place, for
//! as long as it stays a member. An [`Offsets`] barrier must not move once
//! wired because its entries are relative to its own address.

use crate::group::{GROUP_WIDTH, Group};
use crate::sequence::{Gate, Sequence};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

/// Dependency storage of a [`Barrier`]. `anchor` is the address of the
/// barrier's own sequence.
pub trait Storage: Default + Send + Sync {
    /// Short tag shown in descriptions.
    const KIND: &'static str;

    fn load(&self, index: usize, anchor: *const Sequence) -> *const Sequence;
    fn store(&self, index: usize, seq: *const Sequence, anchor: *const Sequence);
    fn exchange(
        &self,
        index: usize,
        current: *const Sequence,
        desired: *const Sequence,
        anchor: *const Sequence,
    ) -> bool;
}

/// Plain addresses, read and written without synchronization.
#[repr(C, align(64))]
#[derive(Default)]
pub struct Pointers([AtomicPtr<Sequence>; GROUP_WIDTH]);

/// Addresses swapped with compare-and-swap.
#[repr(C, align(64))]
#[derive(Default)]
pub struct Atomics([AtomicPtr<Sequence>; GROUP_WIDTH]);

/// Byte offsets relative to the barrier's own sequence; 0 is empty.
#[repr(C, align(64))]
#[derive(Default)]
pub struct Offsets([AtomicIsize; GROUP_WIDTH]);

impl Storage for Pointers {
    const KIND: &'static str = "pointers";

    #[inline(always)]
    fn load(&self, index: usize, _anchor: *const Sequence) -> *const Sequence {
        self.0[index].load(Ordering::Relaxed)
    }

    fn store(&self, index: usize, seq: *const Sequence, _anchor: *const Sequence) {
        self.0[index].store(seq.cast_mut(), Ordering::Relaxed);
    }

    fn exchange(
        &self,
        index: usize,
        current: *const Sequence,
        desired: *const Sequence,
        _anchor: *const Sequence,
    ) -> bool {
        if ptr::eq(self.0[index].load(Ordering::Relaxed), current) {
            self.0[index].store(desired.cast_mut(), Ordering::Relaxed);
            return true;
        }
        false
    }
}

impl Storage for Atomics {
    const KIND: &'static str = "atomics";

    #[inline(always)]
    fn load(&self, index: usize, _anchor: *const Sequence) -> *const Sequence {
        self.0[index].load(Ordering::Acquire)
    }

    fn store(&self, index: usize, seq: *const Sequence, _anchor: *const Sequence) {
        self.0[index].store(seq.cast_mut(), Ordering::Release);
    }

    fn exchange(
        &self,
        index: usize,
        current: *const Sequence,
        desired: *const Sequence,
        _anchor: *const Sequence,
    ) -> bool {
        self.0[index]
            .compare_exchange(
                current.cast_mut(),
                desired.cast_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Offsets {
    #[inline(always)]
    fn offset(seq: *const Sequence, anchor: *const Sequence) -> isize {
        if seq.is_null() {
            0
        } else {
            (seq as isize).wrapping_sub(anchor as isize)
        }
    }

    #[inline(always)]
    fn address(offset: isize, anchor: *const Sequence) -> *const Sequence {
        if offset == 0 {
            ptr::null()
        } else {
            (anchor as isize).wrapping_add(offset) as *const Sequence
        }
    }
}

impl Storage for Offsets {
    const KIND: &'static str = "offsets";

    #[inline(always)]
    fn load(&self, index: usize, anchor: *const Sequence) -> *const Sequence {
        Self::address(self.0[index].load(Ordering::Acquire), anchor)
    }

    fn store(&self, index: usize, seq: *const Sequence, anchor: *const Sequence) {
        self.0[index].store(Self::offset(seq, anchor), Ordering::Release);
    }

    fn exchange(
        &self,
        index: usize,
        current: *const Sequence,
        desired: *const Sequence,
        anchor: *const Sequence,
    ) -> bool {
        self.0[index]
            .compare_exchange(
                Self::offset(current, anchor),
                Self::offset(desired, anchor),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// A node's own progress plus up to [`GROUP_WIDTH`] gating dependencies.
#[repr(C, align(64))]
#[derive(Default)]
pub struct Barrier<S: Storage = Offsets> {
    last: Sequence,
    deps: S,
}

pub type PointerBarrier = Barrier<Pointers>;
pub type AtomicBarrier = Barrier<Atomics>;
pub type OffsetBarrier = Barrier<Offsets>;

impl<S: Storage> Barrier<S> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    fn anchor(&self) -> *const Sequence {
        &self.last
    }

    /// The barrier's own sequence, the one other barriers depend on.
    #[inline(always)]
    pub fn cursor(&self) -> &Sequence {
        &self.last
    }

    #[inline(always)]
    pub fn last(&self) -> i64 {
        self.last.load()
    }

    #[inline(always)]
    pub fn release(&self, seq: i64) {
        self.last.store(seq);
    }

    pub fn size(&self) -> usize {
        self.dependencies().size()
    }

    /// `false` for null.
    pub fn contains(&self, seq: *const Sequence) -> bool {
        !seq.is_null() && self.dependencies().contains(seq)
    }

    pub fn add(&self, seq: &Sequence) -> bool {
        self.exchange(ptr::null(), seq)
    }

    pub fn del(&self, seq: &Sequence) -> bool {
        self.exchange(seq, ptr::null())
    }

    /// Swaps the first entry equal to `removable` for `desired`; null on
    /// either side means "empty entry".
    pub fn exchange(&self, removable: *const Sequence, desired: *const Sequence) -> bool {
        let anchor = self.anchor();
        (0..GROUP_WIDTH).any(|i| {
            ptr::eq(self.deps.load(i, anchor), removable)
                && self.deps.exchange(i, removable, desired, anchor)
        })
    }

    /// Collapses every member of `removable` into one entry: the first match
    /// becomes `desired`, later matches are deleted. Returns whether anything
    /// was substituted.
    pub fn replace(&self, removable: &Group, desired: *const Sequence) -> bool {
        let mut replaced = false;
        for seq in removable.iter() {
            if replaced {
                self.exchange(seq, ptr::null());
            } else {
                replaced = self.exchange(seq, desired);
            }
        }
        replaced
    }

    pub fn dependencies(&self) -> Group {
        let anchor = self.anchor();
        let mut group = Group::new();
        for i in 0..GROUP_WIDTH {
            let seq = self.deps.load(i, anchor);
            if !seq.is_null() {
                group.replace(ptr::null(), seq);
            }
        }
        group
    }

    /// Overwrites the dependency set entry by entry.
    pub fn set(&self, deps: &Group) {
        let anchor = self.anchor();
        for (i, seq) in deps.raw().iter().enumerate() {
            self.deps.store(i, *seq, anchor);
        }
    }

    /// Sets the dependencies and starts own progress at their minimum, or at
    /// [`Sequence::INITIAL`] when there are none.
    pub fn depends(&self, deps: &Group) {
        self.set(deps);
        let start = if deps.is_empty() {
            Sequence::INITIAL
        } else {
            self.minimum_sequence(Sequence::MAX)
        };
        self.release(start);
    }

    /// Smallest dependency position, capped by `minimum`. With no
    /// dependencies this is `minimum` itself.
    #[inline]
    pub fn minimum_sequence(&self, minimum: i64) -> i64 {
        let anchor = self.anchor();
        let mut minimum = minimum;
        for i in 0..GROUP_WIDTH {
            let seq = self.deps.load(i, anchor);
            if !seq.is_null() {
                // SAFETY: members are kept alive by whoever wired them (see
                // the module docs).
                minimum = minimum.min(unsafe { (*seq).load() });
            }
        }
        minimum
    }
}

impl<S: Storage> Gate for Barrier<S> {
    #[inline(always)]
    fn position(&self) -> i64 {
        self.minimum_sequence(Sequence::MAX)
    }
}

impl<S: Storage> fmt::Debug for Barrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("storage", &S::KIND)
            .field("last", &self.last())
            .field("dependencies", &self.size())
            .finish()
    }
}

/// Distance between own progress and the slowest dependency.
pub fn available<S: Storage>(barrier: &Barrier<S>) -> i64 {
    let min = barrier.minimum_sequence(Sequence::MAX);
    let last = barrier.last();
    if min >= last {
        min.saturating_sub(last)
    } else {
        last.saturating_sub(min)
    }
}
