#![forbid(unsafe_code)]

// Stable across processes: one id per publisher.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProducerId(pub u32);

/// Item carried through the ring by the demo processes and tests.
///
/// POD with a fixed layout, so two processes mapping the same region read
/// the same bytes. `number` counts per producer, starting at 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tick {
    pub number: u64,
    pub ts_event_ns: u64,
    pub producer: ProducerId,
    _pad: u32,
    pub checksum: u64,
}

impl Tick {
    pub fn new(number: u64, producer: ProducerId, ts_event_ns: u64) -> Self {
        let mut tick = Self {
            number,
            ts_event_ns,
            producer,
            _pad: 0,
            checksum: 0,
        };
        tick.checksum = tick.digest();
        tick
    }

    #[inline]
    fn digest(&self) -> u64 {
        let mixed = self.number ^ self.ts_event_ns.rotate_left(17) ^ (u64::from(self.producer.0) << 40);
        mixed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0x00B5_A17D
    }

    /// True when no field changed since [`Tick::new`].
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.checksum == self.digest()
    }
}
