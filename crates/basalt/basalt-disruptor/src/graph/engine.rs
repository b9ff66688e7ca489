//! Runtime selection of the concrete sequencer over a region.
//!
//! The (graph type, wait kind) pair picks one of eight monomorphized
//! topologies. Everything above this module talks to it through [`Engine`].

use super::layout::{GraphType, Layout, WaitKind};
use super::vla::{Slot, Vla};
use crate::barrier::Offsets;
use crate::consumer::{Consume, Consumer, Indirect};
use crate::error::Result;
use crate::group::Group;
use crate::sequencer::{Mpmc, Produce, Sequencer, Spmc};
use crate::wait::{BlockStrategy, ShareStrategy, SpinsStrategy, WaitStrategy, YieldStrategy};
use std::sync::Arc;

pub(crate) trait Engine: Send + Sync {
    fn producer(&self) -> Arc<dyn Produce>;
    /// Consumer of `slot` reading straight behind the producers.
    fn direct(&self, slot: &'static Slot) -> Box<dyn Consume>;
    /// Consumer of `slot` reading behind `deps`.
    fn indirect(&self, slot: &'static Slot, deps: &Group) -> Box<dyn Consume>;
}

struct Topology<S: Sequencer>
where
    S::Wait: 'static,
{
    sequencer: Arc<S>,
    wait: &'static S::Wait,
}

impl<S> Engine for Topology<S>
where
    S: Sequencer<Storage = Offsets> + 'static,
    S::Wait: 'static,
{
    fn producer(&self) -> Arc<dyn Produce> {
        // Another graph over the region may have published since.
        self.sequencer.resume();
        self.sequencer.clone()
    }

    fn direct(&self, slot: &'static Slot) -> Box<dyn Consume> {
        Box::new(Consumer::new(&slot.barrier, Arc::clone(&self.sequencer)))
    }

    fn indirect(&self, slot: &'static Slot, deps: &Group) -> Box<dyn Consume> {
        Box::new(Indirect::new(&slot.barrier, self.wait, deps))
    }
}

fn spmc<W: WaitStrategy + 'static>(vla: &Vla, layout: &Layout) -> Result<Box<dyn Engine>> {
    // SAFETY: dispatched on the wait kind the region was constructed with.
    let wait = unsafe { vla.wait::<W>() };
    let sequencer = Spmc::new(&vla.master().barrier, layout.items.capacity, wait)?;
    Ok(Box::new(Topology {
        sequencer: Arc::new(sequencer),
        wait,
    }))
}

fn mpmc<W: WaitStrategy + 'static>(vla: &Vla, layout: &Layout) -> Result<Box<dyn Engine>> {
    // SAFETY: dispatched on the wait kind the region was constructed with.
    let wait = unsafe { vla.wait::<W>() };
    let sequencer = Mpmc::with_storage(
        &vla.master().barrier,
        layout.items.capacity,
        wait,
        vla.published(),
    )?;
    Ok(Box::new(Topology {
        sequencer: Arc::new(sequencer),
        wait,
    }))
}

/// Builds the engine for a constructed (or attached) region.
pub(crate) fn build(vla: &Vla, layout: &Layout) -> Result<Box<dyn Engine>> {
    match (layout.graph.kind, layout.graph.wait) {
        (GraphType::Spmc, WaitKind::Spins) => spmc::<SpinsStrategy>(vla, layout),
        (GraphType::Spmc, WaitKind::Yield) => spmc::<YieldStrategy>(vla, layout),
        (GraphType::Spmc, WaitKind::Block) => spmc::<BlockStrategy>(vla, layout),
        (GraphType::Spmc, WaitKind::Share) => spmc::<ShareStrategy>(vla, layout),
        (GraphType::Mpmc, WaitKind::Spins) => mpmc::<SpinsStrategy>(vla, layout),
        (GraphType::Mpmc, WaitKind::Yield) => mpmc::<YieldStrategy>(vla, layout),
        (GraphType::Mpmc, WaitKind::Block) => mpmc::<BlockStrategy>(vla, layout),
        (GraphType::Mpmc, WaitKind::Share) => mpmc::<ShareStrategy>(vla, layout),
    }
}
