//! Declarative shape of a graph and the byte regions it materializes into.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header: state, counters, stored layout         (align 64)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Slot[0] "Master" │ Slot[1] │ ... │ Slot[max_sub]  (align 64) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ wait strategy instance                                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ published flags: capacity x i64, MPMC only     (align 64)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ items: capacity x item size                 (item align)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Offsets are computed from a [`Layout`] alone, so the size of a region is
//! known before any memory exists.

use super::vla::{Header, Slot};
use crate::error::{DisruptorError, Result};
use crate::wait::{BlockStrategy, ShareStrategy, SpinsStrategy, YieldStrategy};
use rustc_hash::FxHasher;
use serde::Deserialize;
use std::any::type_name;
use std::fmt;
use std::hash::Hasher;
use std::mem::{align_of, size_of};
use std::sync::atomic::AtomicI64;

/// Alignment of the region base and of its cache-line aligned parts.
pub const REGION_ALIGN: usize = 64;

const NAME_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum GraphType {
    Spmc = 0,
    Mpmc = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WaitKind {
    Spins = 0,
    Yield = 1,
    Block = 2,
    Share = 3,
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GraphType::Spmc => "SPMC",
            GraphType::Mpmc => "MPMC",
        })
    }
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WaitKind::Spins => "Spins",
            WaitKind::Yield => "Yield",
            WaitKind::Block => "Block",
            WaitKind::Share => "Share",
        })
    }
}

impl TryFrom<u8> for GraphType {
    type Error = DisruptorError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(GraphType::Spmc),
            1 => Ok(GraphType::Mpmc),
            _ => Err(DisruptorError::Corrupted(format!("graph type tag {tag}"))),
        }
    }
}

impl TryFrom<u8> for WaitKind {
    type Error = DisruptorError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(WaitKind::Spins),
            1 => Ok(WaitKind::Yield),
            2 => Ok(WaitKind::Block),
            3 => Ok(WaitKind::Share),
            _ => Err(DisruptorError::Corrupted(format!("wait kind tag {tag}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub kind: GraphType,
    pub wait: WaitKind,
}

/// Cardinality limits of the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slots {
    pub max_pub: usize,
    pub max_sub: usize,
}

impl Slots {
    /// The master slot plus one per subscriber.
    pub fn count(&self) -> usize {
        1 + self.max_sub
    }
}

/// Item metadata: what lives in the ring and how many.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Items {
    pub capacity: usize,
    pub size: usize,
    pub align: usize,
    /// Hash of the full type name.
    pub hash: u64,
    name: [u8; NAME_CAP],
}

impl Items {
    /// Items of type `T`, named after the type.
    pub fn of<T: Copy>(capacity: usize) -> Self {
        let full = type_name::<T>();
        let mut hasher = FxHasher::default();
        hasher.write(full.as_bytes());
        Self {
            capacity,
            size: size_of::<T>(),
            align: align_of::<T>(),
            hash: hasher.finish(),
            name: [0; NAME_CAP],
        }
        .named(full)
    }

    /// Overrides the stored type name, keeping at most 31 bytes.
    pub fn named(mut self, name: &str) -> Self {
        let mut len = name.len().min(NAME_CAP - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        self.name = [0; NAME_CAP];
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        self
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_CAP);
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub(crate) fn raw_name(&self) -> [u8; NAME_CAP] {
        self.name
    }

    pub(crate) fn from_raw(capacity: usize, size: usize, align: usize, hash: u64, name: [u8; NAME_CAP]) -> Self {
        Self {
            capacity,
            size,
            align,
            hash,
            name,
        }
    }

    /// Bytes of the item ring.
    pub fn bytes(&self) -> usize {
        self.size * self.capacity
    }
}

impl fmt::Debug for Items {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Items")
            .field("capacity", &self.capacity)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("hash", &format_args!("{:#x}", self.hash))
            .field("name", &self.name())
            .finish()
    }
}

/// Shape of a graph: topology kind, slot limits and items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub graph: Shape,
    pub slots: Slots,
    pub items: Items,
}

impl Layout {
    pub fn new(graph: Shape, slots: Slots, items: Items) -> Self {
        Self { graph, slots, items }
    }

    /// Bytes a backing buffer needs, including slack to align its base.
    pub fn size(&self) -> usize {
        Regions::of(self).size
    }

    /// Rejects shapes no graph can be built over.
    pub fn validate(&self) -> Result<()> {
        if !self.items.capacity.is_power_of_two() {
            return Err(DisruptorError::NotPowerOfTwo {
                what: "capacity",
                value: self.items.capacity,
            });
        }
        if !self.items.align.is_power_of_two() || self.items.align > REGION_ALIGN {
            return Err(DisruptorError::InvalidLayout(format!(
                "item alignment {} must be a power of two up to {REGION_ALIGN}",
                self.items.align
            )));
        }
        match self.graph.kind {
            GraphType::Spmc if self.slots.max_pub != 1 => Err(DisruptorError::SpmcProducers {
                limit: self.slots.max_pub,
            }),
            GraphType::Mpmc if self.slots.max_pub == 0 => Err(DisruptorError::InvalidLayout(
                "MPMC needs at least one producer".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_shape(&self, that: &Shape) -> Result<()> {
        let ours = &self.graph;
        if ours != that {
            return Err(DisruptorError::LayoutMismatch {
                section: "graph",
                detail: format!("type:{}={} wait:{}={}", ours.kind, that.kind, ours.wait, that.wait),
            });
        }
        Ok(())
    }

    pub fn check_slots(&self, that: &Slots) -> Result<()> {
        let ours = &self.slots;
        if ours != that {
            return Err(DisruptorError::LayoutMismatch {
                section: "slots",
                detail: format!(
                    "max_pub:{}={} max_sub:{}={}",
                    ours.max_pub, that.max_pub, ours.max_sub, that.max_sub
                ),
            });
        }
        Ok(())
    }

    /// Compares item type metadata; capacity is not part of the item type.
    pub fn check_items(&self, that: &Items) -> Result<()> {
        let ours = &self.items;
        if ours.size != that.size
            || ours.align != that.align
            || ours.hash != that.hash
            || ours.name != that.name
        {
            return Err(DisruptorError::LayoutMismatch {
                section: "items",
                detail: format!(
                    "size:{}={} align:{}={} type:{}={}",
                    ours.size,
                    that.size,
                    ours.align,
                    that.align,
                    ours.name(),
                    that.name()
                ),
            });
        }
        Ok(())
    }

    /// Field-by-field compatibility of two parties attaching to one region.
    pub fn check(&self, that: &Layout) -> Result<()> {
        self.check_shape(&that.graph)?;
        self.check_slots(&that.slots)?;
        self.check_items(&that.items)?;
        if self.items.capacity != that.items.capacity {
            return Err(DisruptorError::LayoutMismatch {
                section: "items",
                detail: format!("capacity:{}={}", self.items.capacity, that.items.capacity),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let i = &self.items;
        write!(
            f,
            "items:'{}' {}@{}x{}({} bytes) slots:{}x{} graph:{}({}) size:{}",
            i.name(),
            i.size,
            i.align,
            i.capacity,
            i.bytes(),
            self.slots.max_pub,
            self.slots.max_sub,
            self.graph.kind,
            self.graph.wait,
            self.size()
        )
    }
}

const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Byte offsets of every region relative to the (64-byte aligned) base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Regions {
    pub slots: usize,
    pub wait: usize,
    pub published: usize,
    pub items: usize,
    pub end: usize,
    pub size: usize,
}

impl Regions {
    pub fn of(layout: &Layout) -> Self {
        let (wait_size, wait_align) = match layout.graph.wait {
            WaitKind::Spins => (size_of::<SpinsStrategy>(), align_of::<SpinsStrategy>()),
            WaitKind::Yield => (size_of::<YieldStrategy>(), align_of::<YieldStrategy>()),
            WaitKind::Block => (size_of::<BlockStrategy>(), align_of::<BlockStrategy>()),
            WaitKind::Share => (size_of::<ShareStrategy>(), align_of::<ShareStrategy>()),
        };
        let flags = match layout.graph.kind {
            GraphType::Spmc => 0,
            GraphType::Mpmc => layout.items.capacity,
        };

        let slots = align_up(size_of::<Header>(), align_of::<Slot>());
        let wait = align_up(slots + layout.slots.count() * size_of::<Slot>(), wait_align);
        let published = align_up(wait + wait_size, REGION_ALIGN);
        let items = align_up(
            published + flags * size_of::<AtomicI64>(),
            layout.items.align.clamp(1, REGION_ALIGN),
        );
        let end = items + layout.items.bytes();
        Self {
            slots,
            wait,
            published,
            items,
            end,
            size: end + REGION_ALIGN,
        }
    }
}
