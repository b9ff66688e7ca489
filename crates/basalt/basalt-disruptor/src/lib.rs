//! Lock-free sequencing over a power-of-two ring.
//!
//! Producers claim and publish sequence numbers through a [`Sequencer`];
//! consumers trail them through barriers of up to eight upstream cursors.
//! [`Graph`] wires named topologies into one memory region that can be
//! shared between processes.

mod barrier;
mod consumer;
mod error;
pub mod graph;
mod group;
mod processor;
mod ring;
mod sequence;
mod sequencer;
mod wait;

pub use barrier::{AtomicBarrier, Atomics, Barrier, OffsetBarrier, Offsets, PointerBarrier, Pointers, Storage, available};
pub use consumer::{Consume, Consumer, Indirect};
pub use error::{BoxError, DisruptorError, Result};
pub use graph::{Graph, GraphOptions, GraphType, Items, Layout, Publisher, RetryPolicy, Shape, ShmMode, ShmOptions, Slots, Subscriber, WaitKind};
pub use group::{GROUP_WIDTH, Group};
pub use processor::{Batch, Consumed, Handler};
pub use ring::Ring;
pub use sequence::{Gate, Sequence};
pub use sequencer::{FLAGS_PER_SCAN, Mpmc, Produce, Sequencer, Spmc};
pub use wait::{BlockStrategy, Spinner, ShareStrategy, SpinsStrategy, WaitStrategy, YieldStrategy};
