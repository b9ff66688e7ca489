//! Consumer side of a topology.
//!
//! - [`Consumer`] reads straight behind a sequencer: its barrier depends on
//!   the sequencer cursor and availability comes from the sequencer.
//! - [`Indirect`] reads behind other consumers: its barrier depends on their
//!   cursors and it waits for the slowest of them.
//!
//! Releasing a position lets every barrier that depends on this consumer
//! (downstream consumers or the producers) move on.

use crate::barrier::{Barrier, Offsets, Storage};
use crate::group::Group;
use crate::sequence::{Gate, Sequence};
use crate::sequencer::Sequencer;
use crate::wait::WaitStrategy;
use std::ops::Deref;

/// Consumer side of a topology node.
pub trait Consume: Send + Sync {
    /// Positions ready to be consumed.
    fn available(&self) -> usize;
    /// Last released position.
    fn last(&self) -> i64;
    /// Blocks until `seq` can be consumed; returns the highest consumable
    /// position, which may be beyond `seq`.
    fn consume(&self, seq: i64) -> i64;
    /// Non-blocking probe; [`Sequence::INITIAL`] when `seq` is not ready.
    fn consumable(&self, seq: i64) -> i64;
    /// Hands positions up to `seq` back to whoever is gated on this consumer.
    fn release(&self, seq: i64);
}

fn distance(to: i64, from: i64) -> usize {
    to.saturating_sub(from).max(0) as usize
}

/// Consumer gated directly by a sequencer. `P` is how the sequencer is held:
/// a reference, or an `Arc` when the consumer must outlive the caller's
/// stack frame.
pub struct Consumer<'a, P>
where
    P: Deref<Target: Sequencer>,
{
    barrier: &'a Barrier<<P::Target as Sequencer>::Storage>,
    sequencer: P,
}

impl<'a, P> Consumer<'a, P>
where
    P: Deref<Target: Sequencer>,
{
    /// Wires `barrier` behind the sequencer cursor, starting at its current
    /// value.
    pub fn new(barrier: &'a Barrier<<P::Target as Sequencer>::Storage>, sequencer: P) -> Self {
        let mut deps = Group::new();
        deps.add(sequencer.cursor());
        barrier.depends(&deps);
        barrier.release(sequencer.last());
        Self { barrier, sequencer }
    }

    pub fn cursor(&self) -> &Sequence {
        self.barrier.cursor()
    }

    pub fn dependencies(&self) -> Group {
        self.barrier.dependencies()
    }
}

impl<P> Consume for Consumer<'_, P>
where
    P: Deref<Target: Sequencer> + Send + Sync,
{
    fn available(&self) -> usize {
        distance(self.sequencer.last(), self.barrier.last())
    }

    #[inline]
    fn last(&self) -> i64 {
        self.barrier.last()
    }

    #[inline]
    fn consume(&self, seq: i64) -> i64 {
        self.sequencer.consume(seq)
    }

    #[inline]
    fn consumable(&self, seq: i64) -> i64 {
        self.sequencer.consumable(seq)
    }

    #[inline]
    fn release(&self, seq: i64) {
        self.barrier.release(seq);
        self.sequencer.wait_strategy().signal_all_when_blocking();
    }
}

/// Consumer gated by other consumers.
pub struct Indirect<'a, W, S: Storage = Offsets> {
    barrier: &'a Barrier<S>,
    wait: &'a W,
}

impl<'a, W: WaitStrategy, S: Storage> Indirect<'a, W, S> {
    /// Wires `barrier` behind `deps`, starting at their minimum.
    pub fn new(barrier: &'a Barrier<S>, wait: &'a W, deps: &Group) -> Self {
        barrier.depends(deps);
        Self { barrier, wait }
    }

    pub fn cursor(&self) -> &Sequence {
        self.barrier.cursor()
    }

    pub fn dependencies(&self) -> Group {
        self.barrier.dependencies()
    }
}

impl<W: WaitStrategy, S: Storage> Consume for Indirect<'_, W, S> {
    fn available(&self) -> usize {
        distance(self.barrier.position(), self.barrier.last())
    }

    #[inline]
    fn last(&self) -> i64 {
        self.barrier.last()
    }

    #[inline]
    fn consume(&self, seq: i64) -> i64 {
        self.wait.wait(seq, self.barrier)
    }

    #[inline]
    fn consumable(&self, seq: i64) -> i64 {
        let upstream = self.barrier.position();
        if seq <= upstream {
            upstream
        } else {
            Sequence::INITIAL
        }
    }

    #[inline]
    fn release(&self, seq: i64) {
        self.barrier.release(seq);
        self.wait.signal_all_when_blocking();
    }
}
