//! Named producer/consumer topologies over one ring, placeable in owned,
//! caller-provided or shared memory.
//!
//! A [`Graph`] materializes a [`Layout`] into a byte region (see
//! [`layout`](self::layout) for the picture), then hands out [`Publisher`]s
//! and [`Subscriber`]s that keep it alive. Several graphs may attach to the
//! same region, from threads or from processes; the first one constructs it,
//! the others check their layout against the stored one.
//!
//! # Topology
//!
//! Slot 0 is `Master`: its barrier gates the producers. Subscribers get one
//! named slot each. Naming dependencies that do not exist yet allocates
//! placeholder slots, so nodes may be subscribed in any order:
//!
//! ```text
//! sub("C1")            Master -> [C1]
//! sub("C3", ["C2"])    Master -> [C1, C3]   C3 -> [C2 (placeholder)]
//! sub("C2", ["C1"])    Master -> [C3]       C2 -> [C1]
//! ```
//!
//! Every topology change runs under the update lock.

mod engine;
mod handle;
mod layout;
mod lock;
mod options;
mod vla;

pub use handle::{Publisher, Subscriber};
pub use layout::{GraphType, Items, Layout, REGION_ALIGN, Shape, Slots, WaitKind};
pub use options::{GraphOptions, ParseRetryError, RetryPolicy, ShmMode, ShmOptions};
pub use vla::{GRAPH_MAGIC, GRAPH_VERSION, MASTER, SLOT_NAME_MAX, State};

use crate::barrier::available;
use crate::error::{DisruptorError, Result};
use crate::group::{GROUP_WIDTH, Group};
use crate::ring::Ring;
use crate::sequence::Sequence;
use basalt_shm::SharedMemory;
use engine::Engine;
use lock::UpdateLock;
use std::fmt;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use vla::{Header, Slot, Vla};

enum Backing {
    Owned(Vec<u8>),
    External,
    Shared(SharedMemory),
}

impl Backing {
    fn describe(&self, base: *const u8) -> String {
        match self {
            Backing::Owned(memory) => {
                format!("in owned memory: size:{} address:{base:p}", memory.len())
            }
            Backing::External => format!("in external memory: address:{base:p}"),
            Backing::Shared(memory) => format!(
                "in shared memory:{}{} size:{} address:{base:p}",
                memory.path().display(),
                if memory.owner() { "(owner)" } else { "" },
                memory.len()
            ),
        }
    }
}

/// A live topology over one region.
pub struct Graph {
    // Dropped before the memory it points into.
    engine: Box<dyn Engine>,
    vla: Vla,
    layout: Layout,
    options: GraphOptions,
    backing: Backing,
}

fn aligned(base: *mut u8) -> Result<NonNull<u8>> {
    let offset = base.align_offset(REGION_ALIGN);
    NonNull::new(base.wrapping_add(offset)).ok_or(DisruptorError::NullStorage)
}

fn check_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.len() > SLOT_NAME_MAX {
        "longer than 15 bytes"
    } else if name == MASTER {
        "reserved"
    } else if name.contains('\0') {
        "contains NUL"
    } else {
        return Ok(());
    };
    Err(DisruptorError::SlotName {
        name: name.to_owned(),
        reason,
    })
}

fn names(deps: &Group) -> Vec<String> {
    deps.iter()
        // SAFETY: every dependency inside a region is the cursor of one of
        // its slots.
        .map(|cursor| unsafe { Slot::owning(cursor) }.name().to_owned())
        .collect()
}

/// Constructs the region or joins the one already there.
///
/// A region torn down while we wait for the update lock reads Empty again;
/// construction is then retried from the start.
fn attach(vla: &Vla, required: &Layout, options: &GraphOptions) -> Result<()> {
    let header = vla.header();
    loop {
        match header.state.compare_exchange(
            State::Empty as u8,
            State::Init as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // SAFETY: winning Empty -> Init gives exclusive access.
                if let Err(error) = unsafe { vla.construct() } {
                    header.state.store(State::Empty as u8, Ordering::Release);
                    return Err(error);
                }
                header.graphs.store(1, Ordering::Release);
                header.state.store(State::Ready as u8, Ordering::Release);
                info!(layout = %required, "graph constructed");
                return Ok(());
            }
            Err(tag) if tag == State::Init as u8 => {
                let ready = options.attach.run(|| (header.state().ok()? != State::Init).then_some(()));
                if ready.is_none() {
                    warn!(policy = %options.attach, "graph construction did not finish");
                    return Err(DisruptorError::StateTimeout {
                        state: State::Init,
                        policy: options.attach,
                    });
                }
                continue;
            }
            Err(_) => {}
        }

        let mut observed = State::Ready as u8;
        let locked = options.update.run(|| match UpdateLock::try_acquire(&header.state, State::Ready) {
            Ok(lock) => Some(Some(lock)),
            Err(tag) if tag == State::Empty as u8 || tag == State::Init as u8 => Some(None),
            Err(tag) => {
                observed = tag;
                None
            }
        });
        let _lock = match locked {
            Some(Some(lock)) => lock,
            Some(None) => continue,
            None => {
                warn!(policy = %options.update, "graph update lock not released");
                return Err(DisruptorError::StateTimeout {
                    state: State::try_from(observed)?,
                    policy: options.update,
                });
            }
        };
        let stored = header.stored_layout()?;
        required.check(&stored)?;
        let graphs = header.graphs.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(layout = %required, graphs, "graph attached");
        return Ok(());
    }
}

fn open_segment(options: &ShmOptions, size: usize) -> io::Result<SharedMemory> {
    let mut last = None;
    let opened = options.open.run(|| match SharedMemory::open(&options.path) {
        Ok(memory) if memory.len() >= size => Some(Ok(memory)),
        Ok(memory) => {
            last = Some(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("segment size {} is below required {size}", memory.len()),
            ));
            None
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) => {
            last = Some(e);
            None
        }
        Err(e) => Some(Err(e)),
    });
    opened.unwrap_or_else(|| {
        warn!(path = %options.path.display(), policy = %options.open, "segment not ready");
        Err(last.unwrap_or_else(|| io::ErrorKind::NotFound.into()))
    })
}

fn acquire_segment(options: &ShmOptions, size: usize) -> io::Result<SharedMemory> {
    match options.mode {
        ShmMode::Create { purge } => SharedMemory::create(&options.path, size, purge),
        ShmMode::Open => open_segment(options, size),
        ShmMode::Attach => match SharedMemory::create(&options.path, size, false) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => open_segment(options, size),
            created => created,
        },
    }
}

impl Graph {
    /// Graph in memory it owns, with room for four subscribers (and four
    /// producers for MPMC). The capacity is rounded up to a power of two.
    pub fn create(kind: GraphType, wait: WaitKind, mut items: Items) -> Result<Arc<Self>> {
        items.capacity = items.capacity.max(2).next_power_of_two();
        let max_pub = match kind {
            GraphType::Spmc => 1,
            GraphType::Mpmc => 4,
        };
        let layout = Layout::new(Shape { kind, wait }, Slots { max_pub, max_sub: 4 }, items);
        layout.validate()?;

        let mut memory = vec![0u8; layout.size()];
        let base = aligned(memory.as_mut_ptr())?;
        // SAFETY: the heap buffer does not move with the Vec and is kept in
        // the graph's backing.
        let vla = unsafe { Vla::new(base, &layout) };
        Self::open(vla, layout, GraphOptions::default(), Backing::Owned(memory))
    }

    /// Graph in caller memory. A zeroed buffer is constructed; one holding
    /// a graph built over the same layout is attached.
    ///
    /// # Safety
    /// `space` must outlive the graph and every handle created from it, and
    /// must not be accessed other than through graphs while they live.
    ///
    /// # Errors
    /// [`DisruptorError::SpaceTooSmall`] if `space` is shorter than
    /// [`Layout::size`], or any layout and attach error.
    pub unsafe fn in_place(required: &Layout, space: &mut [u8], options: GraphOptions) -> Result<Arc<Self>> {
        required.validate()?;
        let size = required.size();
        if space.len() < size {
            return Err(DisruptorError::SpaceTooSmall {
                required: size,
                provided: space.len(),
            });
        }
        let base = aligned(space.as_mut_ptr())?;
        // SAFETY: `size` includes the alignment slack; lifetime per the
        // function contract.
        let vla = unsafe { Vla::new(base, required) };
        Self::open(vla, *required, options, Backing::External)
    }

    /// Graph in a shared segment, visible to other processes.
    ///
    /// # Errors
    /// [`DisruptorError::BlockInSharedMemory`] for a [`WaitKind::Block`]
    /// layout, [`DisruptorError::Shm`] if the segment cannot be acquired, or
    /// any layout and attach error.
    pub fn shared(required: &Layout, shm: &ShmOptions, options: GraphOptions) -> Result<Arc<Self>> {
        if required.graph.wait == WaitKind::Block {
            return Err(DisruptorError::BlockInSharedMemory);
        }
        required.validate()?;
        let size = required.size();
        let shm_error = |source| DisruptorError::Shm {
            path: shm.path.display().to_string(),
            source,
        };
        let mut memory = acquire_segment(shm, size).map_err(shm_error)?;
        if shm.lock {
            memory.lock().map_err(shm_error)?;
        }
        debug!(path = %shm.path.display(), mode = ?shm.mode, owner = memory.owner(), "segment acquired");

        let base = aligned(memory.as_mut_ptr())?;
        // SAFETY: the mapping is at least `size` bytes and moves into the
        // graph's backing.
        let vla = unsafe { Vla::new(base, required) };
        Self::open(vla, *required, options, Backing::Shared(memory))
    }

    fn open(vla: Vla, layout: Layout, options: GraphOptions, backing: Backing) -> Result<Arc<Self>> {
        attach(&vla, &layout, &options)?;
        let engine = match engine::build(&vla, &layout) {
            Ok(engine) => engine,
            Err(error) => {
                vla.header().graphs.fetch_sub(1, Ordering::AcqRel);
                return Err(error);
            }
        };
        Ok(Arc::new(Self {
            engine,
            vla,
            layout,
            options,
            backing,
        }))
    }

    pub(crate) fn header(&self) -> &'static Header {
        self.vla.header()
    }

    fn lock(&self) -> Result<UpdateLock<'static>> {
        UpdateLock::acquire(&self.header().state, State::Ready, self.options.update)
    }

    fn find(&self, name: &str) -> Option<&'static Slot> {
        self.vla.slots().iter().find(|slot| slot.name() == name)
    }

    /// The slot named `name`, allocating it if needed; `true` when new.
    fn construct(&self, name: &str) -> Result<(&'static Slot, bool)> {
        if let Some(slot) = self.find(name) {
            return Ok((slot, false));
        }
        let used = &self.header().slots_used;
        let index = used.load(Ordering::Acquire) as usize + 1;
        if index > self.layout.slots.max_sub {
            return Err(DisruptorError::ConsumerLimit {
                max: self.layout.slots.max_sub,
            });
        }
        used.store(index as u64, Ordering::Release);
        let slot = &self.vla.slots()[index];
        slot.set_name(name);
        debug!(name, index, "slot allocated");
        Ok((slot, true))
    }

    /// Checks that `subscriber(name, deps)` fits before any slot is touched,
    /// so a rejected call leaves the topology as it was.
    fn check_room(&self, name: &str, deps: &[&str]) -> Result<()> {
        let mut missing: Vec<&str> = Vec::new();
        for candidate in std::iter::once(name).chain(deps.iter().copied()) {
            if self.find(candidate).is_none() && !missing.contains(&candidate) {
                missing.push(candidate);
            }
        }
        let used = self.header().slots_used.load(Ordering::Acquire) as usize;
        if used + missing.len() > self.layout.slots.max_sub {
            return Err(DisruptorError::ConsumerLimit {
                max: self.layout.slots.max_sub,
            });
        }

        if self.find(name).is_some() {
            return Ok(());
        }
        let master = &self.vla.master().barrier;
        let absorbed = deps
            .iter()
            .filter_map(|dep| self.find(dep))
            .any(|upstream| master.contains(upstream.cursor()));
        if !absorbed && master.size() >= GROUP_WIDTH {
            return Err(DisruptorError::GatingLimit);
        }
        Ok(())
    }

    /// Producer handle gated by the master slot.
    ///
    /// # Errors
    /// [`DisruptorError::SingleProducer`] when an SPMC graph already has a
    /// live publisher, [`DisruptorError::ProducerLimit`] past `max_pub`.
    pub fn publisher(self: &Arc<Self>, name: &str) -> Result<Publisher> {
        let _lock = self.lock()?;
        let pubs = &self.header().pubs;
        let live = pubs.load(Ordering::Acquire) as usize;
        if self.layout.graph.kind == GraphType::Spmc && live >= 1 {
            return Err(DisruptorError::SingleProducer);
        }
        if live >= self.layout.slots.max_pub {
            return Err(DisruptorError::ProducerLimit {
                max: self.layout.slots.max_pub,
            });
        }
        pubs.fetch_add(1, Ordering::AcqRel);
        debug!(name, live = live + 1, "publisher attached");
        Ok(Publisher {
            producer: self.engine.producer(),
            graph: Arc::clone(self),
            name: name.to_owned(),
        })
    }

    /// Consumer handle for slot `name`.
    ///
    /// Without dependencies it reads straight behind the producers and
    /// becomes a dependency of the master slot. With dependencies it reads
    /// behind them, and takes their place in the master slot: the producers
    /// stay gated by the current frontier of the topology only.
    ///
    /// # Errors
    /// [`DisruptorError::SlotName`] for an invalid name,
    /// [`DisruptorError::DependencyLimit`] past 8 dependencies,
    /// [`DisruptorError::ConsumerLimit`] when no slot is left and
    /// [`DisruptorError::GatingLimit`] when the master barrier is full.
    pub fn subscriber(self: &Arc<Self>, name: &str, deps: &[&str]) -> Result<Subscriber> {
        check_name(name)?;
        for dep in deps {
            check_name(dep)?;
            if *dep == name {
                return Err(DisruptorError::SlotName {
                    name: name.to_owned(),
                    reason: "depends on itself",
                });
            }
        }
        if deps.len() > GROUP_WIDTH {
            return Err(DisruptorError::DependencyLimit { max: GROUP_WIDTH });
        }

        let _lock = self.lock()?;
        self.check_room(name, deps)?;
        let master = self.vla.master();
        let (slot, fresh) = self.construct(name)?;

        let consumer = if deps.is_empty() {
            let consumer = self.engine.direct(slot);
            if fresh && !master.barrier.add(slot.cursor()) {
                return Err(DisruptorError::GatingLimit);
            }
            consumer
        } else {
            let mut group = Group::new();
            for dep in deps {
                let (upstream, _) = self.construct(dep)?;
                group.add(upstream.cursor());
            }
            let consumer = self.engine.indirect(slot, &group);
            if fresh {
                if !master.barrier.replace(&group, slot.cursor()) && !master.barrier.add(slot.cursor()) {
                    return Err(DisruptorError::GatingLimit);
                }
            } else {
                master.barrier.replace(&group, ptr::null());
            }
            consumer
        };

        let live = self.header().subs.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            name,
            deps = ?deps,
            master = ?names(&master.barrier.dependencies()),
            live,
            "subscriber attached"
        );
        Ok(Subscriber {
            consumer,
            graph: Arc::clone(self),
            name: name.to_owned(),
        })
    }

    /// Names of the slots `name` depends on; the master slot's when no slot
    /// is called `name`.
    pub fn dependencies(&self, name: &str) -> Result<Vec<String>> {
        let _lock = self.lock()?;
        let slot = self.find(name).unwrap_or_else(|| self.vla.master());
        Ok(names(&slot.barrier.dependencies()))
    }

    /// Multi-line dump: backing memory, state, layout and one line per slot.
    pub fn description(&self) -> Result<String> {
        let lock = self.lock()?;
        let header = self.header();
        let capacity = self.capacity() as i64;

        let mut lines = vec![
            self.backing.describe(self.vla.base()),
            format!(
                "state:{} {} graphs:{} pubs:{} subs:{}",
                lock.previous(),
                self.layout,
                header.graphs.load(Ordering::Acquire),
                header.pubs.load(Ordering::Acquire),
                header.subs.load(Ordering::Acquire)
            ),
        ];
        for (index, slot) in self.vla.slots().iter().enumerate() {
            let deps = names(&slot.barrier.dependencies());
            let last = slot.barrier.last();
            let text = if slot.is_unused() && last == Sequence::INITIAL && deps.is_empty() {
                "Empty".to_owned()
            } else {
                let depends = if deps.is_empty() {
                    "Empty".to_owned()
                } else {
                    format!("{}x[{}]", deps.len(), deps.join(", "))
                };
                let full = available(&slot.barrier).min(capacity) as f64 / capacity as f64 * 100.0;
                format!(
                    "name: {:8} last: {last:2} full: {full:.0}% depends: {depends}",
                    slot.name()
                )
            };
            lines.push(format!("Slot{index:<2} {text}"));
        }
        Ok(lines.join("\n"))
    }

    pub fn capacity(&self) -> usize {
        self.layout.items.capacity
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Ring over the items, checked against `T`.
    ///
    /// Items start zeroed: `T` must be plain data for which all-zero bytes
    /// are a valid value.
    pub fn ring<T: Copy>(&self) -> Result<Ring<'_, T>> {
        self.ring_of(Items::of::<T>(self.capacity()))
    }

    /// Like [`ring`](Self::ring) for items stored under a custom type name.
    pub fn named_ring<T: Copy>(&self, name: &str) -> Result<Ring<'_, T>> {
        self.ring_of(Items::of::<T>(self.capacity()).named(name))
    }

    fn ring_of<T>(&self, items: Items) -> Result<Ring<'_, T>> {
        self.layout.check_items(&items)?;
        // SAFETY: the item region holds `capacity` slots of a matching size
        // and alignment and lives as long as `self`.
        unsafe { Ring::from_raw_parts(self.vla.items().cast::<T>(), self.capacity()) }
    }

    /// Decrements a live count, under the lock when it can be taken.
    pub(crate) fn detach(&self, live: &AtomicU64, role: &'static str, name: &str) {
        let lock = self.lock();
        live.fetch_sub(1, Ordering::AcqRel);
        match lock {
            Ok(_) => debug!(role, name, "detached"),
            Err(error) => warn!(role, name, %error, "detached without the update lock"),
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        let lock = self.lock();
        let graphs = self.header().graphs.fetch_sub(1, Ordering::AcqRel) - 1;
        match lock {
            Ok(mut lock) if graphs == 0 => {
                // SAFETY: locked, and handles keep their graph attached, so
                // no party is left.
                unsafe { self.vla.destroy() };
                lock.restore(State::Empty);
                info!(layout = %self.layout, "graph destroyed");
            }
            Ok(_) => debug!(graphs, "graph detached"),
            Err(error) => warn!(%error, graphs, "graph detached without the update lock"),
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("layout", &self.layout)
            .field("state", &self.header().state())
            .field("base", &self.vla.base())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn layout() -> Layout {
        Layout::new(
            Shape {
                kind: GraphType::Spmc,
                wait: WaitKind::Spins,
            },
            Slots { max_pub: 1, max_sub: 2 },
            Items::of::<u64>(8),
        )
    }

    #[test]
    fn attach_rebuilds_region_torn_down_while_waiting() {
        let layout = layout();
        let mut space = vec![0u8; layout.size()];
        let vla = unsafe { Vla::new(aligned(space.as_mut_ptr()).unwrap(), &layout) };
        let header = vla.header();
        // Another graph holds the update lock, then destroys the region.
        header.state.store(State::Updating as u8, Ordering::Release);

        thread::scope(|s| {
            s.spawn(move || {
                thread::sleep(Duration::from_millis(20));
                header.state.store(State::Empty as u8, Ordering::Release);
            });
            attach(&vla, &layout, &GraphOptions::default()).unwrap();
        });
        assert_eq!(header.state().unwrap(), State::Ready);
        assert_eq!(header.graphs.load(Ordering::Acquire), 1);
        assert_eq!(header.stored_layout().unwrap(), layout);
        unsafe { vla.destroy() };
    }

    #[test]
    fn attach_joins_ready_region() {
        let layout = layout();
        let mut space = vec![0u8; layout.size()];
        let vla = unsafe { Vla::new(aligned(space.as_mut_ptr()).unwrap(), &layout) };
        attach(&vla, &layout, &GraphOptions::default()).unwrap();
        attach(&vla, &layout, &GraphOptions::default()).unwrap();
        assert_eq!(vla.header().graphs.load(Ordering::Acquire), 2);
        assert_eq!(vla.header().state().unwrap(), State::Ready);
        unsafe { vla.destroy() };
    }
}
