//! The materialized layout: a header, named slots, a wait strategy, the
//! published flags and the item ring, placed in one byte region.
//!
//! Construction and destruction are explicit. Whoever wins the
//! `Empty -> Init` transition constructs; the last detaching party destroys
//! and puts the state back to `Empty`, so the memory can be reused.

use super::layout::{GraphType, Items, Layout, REGION_ALIGN, Regions, Shape, Slots, WaitKind};
use crate::barrier::OffsetBarrier;
use crate::error::{DisruptorError, Result};
use crate::sequence::Sequence;
use crate::wait::{BlockStrategy, ShareStrategy, SpinsStrategy, WaitStrategy, YieldStrategy};
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

/// Magic number of a constructed graph region.
///
/// ASCII encoding of "BASALTGR":
/// `0x4241_5341_4C54_4752` = "BASALTGR"
pub const GRAPH_MAGIC: u64 = 0x4241_5341_4C54_4752;

/// Increment on incompatible changes to the region layout.
pub const GRAPH_VERSION: u64 = 1;

/// Name of the slot whose barrier gates the producers.
pub const MASTER: &str = "Master";

/// Longest slot name in bytes.
pub const SLOT_NAME_MAX: usize = 15;

/// Construction state of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Empty = 0,
    Init = 1,
    Ready = 2,
    Updating = 3,
}

impl TryFrom<u8> for State {
    type Error = DisruptorError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(State::Empty),
            1 => Ok(State::Init),
            2 => Ok(State::Ready),
            3 => Ok(State::Updating),
            _ => Err(DisruptorError::Corrupted(format!("state tag {tag}"))),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Empty => "Empty",
            State::Init => "Init",
            State::Ready => "Ready",
            State::Updating => "Updating",
        })
    }
}

/// Layout as written by the constructor, read back by attachers.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct StoredLayout {
    magic: u64,
    version: u64,
    kind: u8,
    wait: u8,
    _pad: [u8; 6],
    max_pub: u64,
    max_sub: u64,
    capacity: u64,
    size: u64,
    align: u64,
    hash: u64,
    name: [u8; 32],
}

impl StoredLayout {
    fn encode(layout: &Layout) -> Self {
        Self {
            magic: GRAPH_MAGIC,
            version: GRAPH_VERSION,
            kind: layout.graph.kind as u8,
            wait: layout.graph.wait as u8,
            _pad: [0; 6],
            max_pub: layout.slots.max_pub as u64,
            max_sub: layout.slots.max_sub as u64,
            capacity: layout.items.capacity as u64,
            size: layout.items.size as u64,
            align: layout.items.align as u64,
            hash: layout.items.hash,
            name: layout.items.raw_name(),
        }
    }

    fn decode(&self) -> Result<Layout> {
        if self.magic != GRAPH_MAGIC {
            return Err(DisruptorError::Corrupted(format!("bad magic {:#x}", self.magic)));
        }
        if self.version != GRAPH_VERSION {
            return Err(DisruptorError::Corrupted(format!(
                "version {} != {GRAPH_VERSION}",
                self.version
            )));
        }
        Ok(Layout::new(
            Shape {
                kind: GraphType::try_from(self.kind)?,
                wait: WaitKind::try_from(self.wait)?,
            },
            Slots {
                max_pub: self.max_pub as usize,
                max_sub: self.max_sub as usize,
            },
            Items::from_raw(
                self.capacity as usize,
                self.size as usize,
                self.align as usize,
                self.hash,
                self.name,
            ),
        ))
    }
}

/// Start of every region.
#[repr(C, align(64))]
pub(crate) struct Header {
    pub state: AtomicU8,
    /// Graphs attached to the region; the last one to leave resets it.
    pub graphs: AtomicU64,
    /// Live publishers over all attached parties.
    pub pubs: AtomicU64,
    /// Live subscribers over all attached parties.
    pub subs: AtomicU64,
    /// Subscriber slots handed out, placeholders included.
    pub slots_used: AtomicU64,
    stored: UnsafeCell<StoredLayout>,
}

// SAFETY: `stored` is written once by the constructor before the state turns
// Ready and read afterwards only; everything else is atomic.
unsafe impl Sync for Header {}

impl Header {
    pub fn state(&self) -> Result<State> {
        State::try_from(self.state.load(Ordering::Acquire))
    }

    pub fn stored_layout(&self) -> Result<Layout> {
        // SAFETY: see the Sync impl.
        unsafe { (*self.stored.get()).decode() }
    }
}

/// A named node of the topology.
///
/// `barrier` sits at offset 0 and its own sequence at offset 0 of the
/// barrier, so a dependency pointer is also the address of the slot that
/// owns it.
#[repr(C, align(64))]
pub(crate) struct Slot {
    pub barrier: OffsetBarrier,
    name: UnsafeCell<[u8; 16]>,
}

// SAFETY: the name is written only under the update lock and read under it.
unsafe impl Sync for Slot {}

impl Default for Slot {
    fn default() -> Self {
        Self {
            barrier: OffsetBarrier::new(),
            name: UnsafeCell::new([0; 16]),
        }
    }
}

impl Slot {
    /// The slot owning `cursor`.
    ///
    /// # Safety
    /// `cursor` must be the barrier cursor of a slot in a live region.
    pub unsafe fn owning(cursor: *const Sequence) -> &'static Slot {
        // SAFETY: guaranteed by the caller; layout per the type docs.
        unsafe { &*cursor.cast::<Slot>() }
    }

    pub fn cursor(&self) -> &Sequence {
        self.barrier.cursor()
    }

    pub fn name(&self) -> &str {
        // SAFETY: see the Sync impl.
        let raw = unsafe { &*self.name.get() };
        let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        std::str::from_utf8(&raw[..len]).unwrap_or("")
    }

    /// `name` must already be validated to fit.
    pub fn set_name(&self, name: &str) {
        let mut raw = [0u8; 16];
        let len = name.len().min(SLOT_NAME_MAX);
        raw[..len].copy_from_slice(&name.as_bytes()[..len]);
        // SAFETY: see the Sync impl.
        unsafe { *self.name.get() = raw };
    }

    pub fn is_unused(&self) -> bool {
        self.name().is_empty()
    }
}

/// View of one region: base address plus the offsets of its parts.
pub(crate) struct Vla {
    base: NonNull<u8>,
    layout: Layout,
    regions: Regions,
}

// SAFETY: the region is shared between graphs; all mutation goes through atomics,
// the update lock or the claim/consume protocol.
unsafe impl Send for Vla {}
unsafe impl Sync for Vla {}

impl Vla {
    /// # Safety
    /// `base` must be aligned to [`REGION_ALIGN`], valid for
    /// `Regions::of(layout).end` bytes, and outlive every reference handed
    /// out by this view. All `'static` references returned below rely on
    /// this: the graph owning the view keeps the memory alive for as long
    /// as any engine, publisher or subscriber can reach it.
    pub unsafe fn new(base: NonNull<u8>, layout: &Layout) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % REGION_ALIGN, 0);
        Self {
            base,
            layout: *layout,
            regions: Regions::of(layout),
        }
    }

    #[inline]
    fn at<T>(&self, offset: usize) -> *mut T {
        // SAFETY: offsets come from Regions and stay within the region.
        unsafe { self.base.as_ptr().add(offset).cast() }
    }

    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    pub fn header(&self) -> &'static Header {
        // SAFETY: the header is plain atomics plus a POD and valid in any
        // state, including zeroed memory.
        unsafe { &*self.at::<Header>(0) }
    }

    pub fn slots(&self) -> &'static [Slot] {
        // SAFETY: slots are constructed before the state leaves Init and
        // are valid for zeroed memory as well (all atomics and bytes).
        unsafe { std::slice::from_raw_parts(self.at(self.regions.slots), self.layout.slots.count()) }
    }

    pub fn master(&self) -> &'static Slot {
        &self.slots()[0]
    }

    /// # Safety
    /// `W` must be the strategy this region was constructed with.
    pub unsafe fn wait<W: WaitStrategy>(&self) -> &'static W {
        // SAFETY: guaranteed by the caller.
        unsafe { &*self.at::<W>(self.regions.wait) }
    }

    pub fn published(&self) -> &'static [AtomicI64] {
        let len = match self.layout.graph.kind {
            GraphType::Spmc => 0,
            GraphType::Mpmc => self.layout.items.capacity,
        };
        // SAFETY: the flags region holds `len` aligned i64 values.
        unsafe { std::slice::from_raw_parts(self.at(self.regions.published), len) }
    }

    pub fn items(&self) -> *mut u8 {
        self.at(self.regions.items)
    }

    /// Builds every part in place.
    ///
    /// # Safety
    /// The caller must hold the `Init` state: nobody else touches the region.
    pub unsafe fn construct(&self) -> Result<()> {
        let header = self.header();
        header.graphs.store(0, Ordering::Relaxed);
        header.pubs.store(0, Ordering::Relaxed);
        header.subs.store(0, Ordering::Relaxed);
        header.slots_used.store(0, Ordering::Relaxed);

        // SAFETY: exclusive access per the function contract; every pointer
        // is aligned per Regions.
        unsafe {
            let slots = self.at::<Slot>(self.regions.slots);
            for i in 0..self.layout.slots.count() {
                slots.add(i).write(Slot::default());
            }
            match self.layout.graph.wait {
                WaitKind::Spins => SpinsStrategy::init_in_place(self.at(self.regions.wait))?,
                WaitKind::Yield => YieldStrategy::init_in_place(self.at(self.regions.wait))?,
                WaitKind::Block => BlockStrategy::init_in_place(self.at(self.regions.wait))?,
                WaitKind::Share => ShareStrategy::init_in_place(self.at(self.regions.wait))?,
            }
            for flag in self.published() {
                flag.store(Sequence::INITIAL, Ordering::Relaxed);
            }
            ptr::write_bytes(self.items(), 0, self.layout.items.bytes());
            header.stored.get().write(StoredLayout::encode(&self.layout));
        }
        self.master().set_name(MASTER);
        Ok(())
    }

    /// Tears down what `construct` built.
    ///
    /// # Safety
    /// The caller must hold the update lock as the last attached graph, and
    /// nothing may use the wait strategy afterwards.
    pub unsafe fn destroy(&self) {
        // SAFETY: per the function contract.
        unsafe {
            match self.layout.graph.wait {
                WaitKind::Spins => ptr::drop_in_place(self.at::<SpinsStrategy>(self.regions.wait)),
                WaitKind::Yield => ptr::drop_in_place(self.at::<YieldStrategy>(self.regions.wait)),
                WaitKind::Block => ptr::drop_in_place(self.at::<BlockStrategy>(self.regions.wait)),
                WaitKind::Share => ptr::drop_in_place(self.at::<ShareStrategy>(self.regions.wait)),
            }
            ptr::write_bytes(self.header().stored.get(), 0, 1);
        }
        for slot in self.slots() {
            slot.set_name("");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{Layout as Alloc, alloc_zeroed, dealloc};
    use std::mem::{offset_of, size_of};

    struct Region {
        ptr: NonNull<u8>,
        alloc: Alloc,
    }

    impl Region {
        fn new(size: usize) -> Self {
            let alloc = Alloc::from_size_align(size, REGION_ALIGN).unwrap();
            let ptr = NonNull::new(unsafe { alloc_zeroed(alloc) }).unwrap();
            Self { ptr, alloc }
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr.as_ptr(), self.alloc) };
        }
    }

    fn layout(kind: GraphType, wait: WaitKind) -> Layout {
        let max_pub = if kind == GraphType::Mpmc { 2 } else { 1 };
        Layout::new(
            Shape { kind, wait },
            Slots { max_pub, max_sub: 2 },
            Items::of::<u64>(8),
        )
    }

    #[test]
    fn slot_starts_with_its_cursor() {
        assert_eq!(offset_of!(Slot, barrier), 0);
        assert_eq!(size_of::<Slot>() % 64, 0);
        let slot = Slot::default();
        let owner = unsafe { Slot::owning(slot.cursor()) };
        assert!(ptr::eq(owner, &slot));
    }

    #[test]
    fn slot_names_are_truncated_and_cleared() {
        let slot = Slot::default();
        assert!(slot.is_unused());
        slot.set_name("C1");
        assert_eq!(slot.name(), "C1");
        slot.set_name("0123456789abcdefXYZ");
        assert_eq!(slot.name(), "0123456789abcde");
        slot.set_name("");
        assert!(slot.is_unused());
    }

    #[test]
    fn state_tags_round_trip() {
        for state in [State::Empty, State::Init, State::Ready, State::Updating] {
            assert_eq!(State::try_from(state as u8).unwrap(), state);
        }
        assert_eq!(State::try_from(9).unwrap_err().to_string(), "corrupted graph region: state tag 9");
    }

    #[test]
    fn construct_then_destroy() {
        for (kind, wait) in [
            (GraphType::Spmc, WaitKind::Spins),
            (GraphType::Mpmc, WaitKind::Yield),
            (GraphType::Spmc, WaitKind::Block),
            (GraphType::Mpmc, WaitKind::Share),
        ] {
            let l = layout(kind, wait);
            let region = Region::new(l.size());
            let vla = unsafe { Vla::new(region.ptr, &l) };
            assert!(vla.header().stored_layout().is_err());

            unsafe { vla.construct().unwrap() };
            assert_eq!(vla.master().name(), MASTER);
            assert_eq!(vla.slots().len(), 3);
            assert!(vla.slots()[1..].iter().all(Slot::is_unused));
            assert_eq!(vla.master().barrier.last(), Sequence::INITIAL);
            let flags = if kind == GraphType::Mpmc { 8 } else { 0 };
            assert_eq!(vla.published().len(), flags);
            assert!(vla.published().iter().all(|f| f.load(Ordering::Relaxed) == Sequence::INITIAL));
            assert_eq!(vla.header().stored_layout().unwrap(), l);

            unsafe { vla.destroy() };
            assert!(vla.master().is_unused());
            let err = vla.header().stored_layout().unwrap_err();
            assert_eq!(err.to_string(), "corrupted graph region: bad magic 0x0");
        }
    }

    #[test]
    fn stored_layout_rejects_other_versions() {
        let l = layout(GraphType::Spmc, WaitKind::Spins);
        let mut stored = StoredLayout::encode(&l);
        assert_eq!(stored.decode().unwrap(), l);
        stored.version = 7;
        assert_eq!(stored.decode().unwrap_err().to_string(), "corrupted graph region: version 7 != 1");
        stored.version = GRAPH_VERSION;
        stored.wait = 42;
        assert!(stored.decode().is_err());
    }
}
