//! Batch processing loop over a consumer barrier and a ring.
//!
//! # Loop
//!
//! 1. `available = barrier.consume(next)` (blocks, or polls with a timeout)
//! 2. `handler.on_batch(next, available - next + 1)`
//! 3. For each item, `handler.on_consume(item, seq, remaining)`:
//!    - [`Consumed::Release`]: release this position now
//!    - [`Consumed::Keep`]: advance without releasing
//!    - [`Consumed::Exit`]: release and stop after this batch
//! 4. Release `available`, check for halt, repeat.
//!
//! A failing `on_consume` goes to `on_exception`. If that returns an error,
//! the loop stops and returns it; otherwise the failing item counts as
//! consumed.

use crate::consumer::Consume;
use crate::error::{BoxError, DisruptorError, Result};
use crate::ring::Ring;
use crate::sequence::Sequence;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// What to do with a consumed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    Exit,
    Release,
    Keep,
}

/// Callbacks driven by [`Batch::run`].
pub trait Handler<T> {
    fn on_running(&mut self, _running: bool) {}

    fn on_batch(&mut self, _seq: i64, _count: usize) {}

    /// `remaining` counts the items left in the current batch after this one.
    fn on_consume(&mut self, item: &mut T, seq: i64, remaining: usize) -> Result<Consumed, BoxError>;

    /// Nothing arrived within the timeout set with [`Batch::with_timeout`].
    fn on_timeout(&mut self, _seq: i64) {}

    fn on_exception(&mut self, error: BoxError, seq: i64) -> Result<()> {
        Err(DisruptorError::Handler {
            sequence: seq,
            source: error,
        })
    }
}

/// Drives one consumer: `barrier` decides what is readable, `ring` holds it.
pub struct Batch<'a, T, C: ?Sized> {
    barrier: &'a C,
    ring: Ring<'a, T>,
    timeout: Option<Duration>,
    running: AtomicBool,
    halting: AtomicBool,
}

impl<'a, T, C: Consume + ?Sized> Batch<'a, T, C> {
    pub fn new(barrier: &'a C, ring: Ring<'a, T>) -> Self {
        Self {
            barrier,
            ring,
            timeout: None,
            running: AtomicBool::new(false),
            halting: AtomicBool::new(false),
        }
    }

    /// Polls instead of blocking; calls `on_timeout` after `timeout` without
    /// new items, which also lets an idle loop observe `halt`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the loop to stop at the next batch boundary and waits until it
    /// has. A halt issued while no loop runs stops the next `run` before its
    /// first batch.
    pub fn halt(&self) {
        self.halting.store(true, Ordering::Release);
        while self.running() {
            std::thread::yield_now();
        }
    }

    fn available<H: Handler<T>>(&self, next: i64, handler: &mut H) -> Option<i64> {
        let Some(timeout) = self.timeout else {
            return Some(self.barrier.consume(next));
        };
        let mut deadline = Instant::now() + timeout;
        loop {
            let available = self.barrier.consumable(next);
            if available != Sequence::INITIAL {
                return Some(available);
            }
            if Instant::now() >= deadline {
                handler.on_timeout(next);
                if self.halting.load(Ordering::Acquire) {
                    return None;
                }
                deadline = Instant::now() + timeout;
            }
            std::thread::yield_now();
        }
    }

    /// Runs the loop on the calling thread until a handler exits, `halt` is
    /// called or `on_exception` fails.
    ///
    /// # Errors
    /// [`DisruptorError::AlreadyRunning`] if another thread runs this batch,
    /// or the error returned by `on_exception`.
    pub fn run<H: Handler<T>>(&self, handler: &mut H) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DisruptorError::AlreadyRunning);
        }
        handler.on_running(true);

        let result = self.process(handler);

        self.halting.store(false, Ordering::Release);
        handler.on_running(false);
        self.running.store(false, Ordering::Release);
        result
    }

    fn process<H: Handler<T>>(&self, handler: &mut H) -> Result<()> {
        let mut next = self.barrier.last() + 1;
        while !self.halting.load(Ordering::Acquire) {
            let Some(available) = self.available(next, handler) else {
                break;
            };
            handler.on_batch(next, (available - next + 1) as usize);
            while next <= available {
                // SAFETY: `next` is consumable and not yet released by us.
                let item = unsafe { self.ring.get_mut(next) };
                match handler.on_consume(item, next, (available - next) as usize) {
                    Ok(Consumed::Exit) => {
                        self.halting.store(true, Ordering::Release);
                        self.barrier.release(next);
                    }
                    Ok(Consumed::Release) => self.barrier.release(next),
                    Ok(Consumed::Keep) => {}
                    Err(error) => {
                        handler.on_exception(error, next)?;
                        self.barrier.release(next);
                    }
                }
                next += 1;
            }
            self.barrier.release(available);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::OffsetBarrier;
    use crate::consumer::Consumer;
    use crate::sequencer::{Produce, Sequencer, Spmc};
    use crate::wait::{BlockStrategy, SpinsStrategy};
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        running: Vec<bool>,
        batches: usize,
        consumed: Vec<(i64, u64)>,
    }

    impl Handler<u64> for Recorder {
        fn on_running(&mut self, running: bool) {
            self.running.push(running);
        }

        fn on_batch(&mut self, _seq: i64, count: usize) {
            self.batches += count;
        }

        fn on_consume(&mut self, item: &mut u64, seq: i64, _remaining: usize) -> Result<Consumed, BoxError> {
            self.consumed.push((seq, *item));
            match seq {
                0 => Ok(Consumed::Release),
                1 => Ok(Consumed::Keep),
                2 => Ok(Consumed::Exit),
                _ => Err("check on_exception".into()),
            }
        }
    }

    #[test]
    fn release_keep_exit_then_exception() {
        let mut items = [0u64; 8];
        let ring = Ring::new(&mut items).unwrap();
        let (master, barrier) = (OffsetBarrier::new(), OffsetBarrier::new());
        let wait = SpinsStrategy;
        let p = Spmc::new(&master, 8, &wait).unwrap();
        let c = Consumer::new(&barrier, &p);
        p.add(c.cursor());

        let end = p.claim(3);
        for seq in 0..end {
            unsafe { *ring.get_mut(seq) = 100 + seq as u64 };
        }
        p.publish_range(0, end);

        let batch = Batch::new(&c, ring);
        let mut handler = Recorder::default();
        batch.run(&mut handler).unwrap();
        assert!(!batch.running());
        assert_eq!(handler.batches, 3);
        assert_eq!(handler.consumed, vec![(0, 100), (1, 101), (2, 102)]);
        assert_eq!(handler.running, vec![true, false]);
        assert_eq!(c.last(), 2);

        let seq = p.claim(1) - 1;
        unsafe { *ring.get_mut(seq) = 103 };
        p.publish(seq);
        let err = batch.run(&mut handler).unwrap_err();
        assert_eq!(err.to_string(), "exception on #3: check on_exception");
        assert!(!batch.running());
        assert_eq!(c.last(), 2);
    }

    struct Counter {
        expected: u64,
    }

    impl Handler<u64> for Counter {
        fn on_consume(&mut self, item: &mut u64, _seq: i64, _remaining: usize) -> Result<Consumed, BoxError> {
            assert_eq!(*item, self.expected);
            self.expected += 1;
            Ok(Consumed::Release)
        }
    }

    #[test]
    fn halt_stops_idle_loop_with_timeout() {
        let mut items = [0u64; 16];
        let ring = Ring::new(&mut items).unwrap();
        let (master, barrier) = (OffsetBarrier::new(), OffsetBarrier::new());
        let wait = BlockStrategy::default();
        let p = Spmc::new(&master, 16, &wait).unwrap();
        let c = Consumer::new(&barrier, &p);
        p.add(c.cursor());

        let batch = Batch::new(&c, ring).with_timeout(Duration::from_millis(1));
        thread::scope(|s| {
            let runner = s.spawn(|| {
                let mut handler = Counter { expected: 0 };
                batch.run(&mut handler).map(|()| handler.expected)
            });
            for n in 0..100u64 {
                let seq = p.claim(1) - 1;
                unsafe { *ring.get_mut(seq) = n };
                p.publish(seq);
            }
            while p.barrier().minimum_sequence(Sequence::MAX) < 99 {
                thread::yield_now();
            }
            batch.halt();
            assert_eq!(runner.join().unwrap().unwrap(), 100);
        });
    }

    #[test]
    fn halt_before_run_is_not_lost() {
        let mut items = [0u64; 8];
        let ring = Ring::new(&mut items).unwrap();
        let (master, barrier) = (OffsetBarrier::new(), OffsetBarrier::new());
        let wait = SpinsStrategy;
        let p = Spmc::new(&master, 8, &wait).unwrap();
        let c = Consumer::new(&barrier, &p);
        p.add(c.cursor());
        let end = p.claim(3);
        p.publish_range(0, end);

        let batch = Batch::new(&c, ring);
        batch.halt();
        let mut handler = Counter { expected: 0 };
        batch.run(&mut handler).unwrap();
        assert_eq!(handler.expected, 0);
        assert_eq!(c.last(), -1);

        let mut handler = Recorder::default();
        batch.run(&mut handler).unwrap();
        assert_eq!(handler.consumed, vec![(0, 0), (1, 0), (2, 0)]);
        assert_eq!(c.last(), 2);
    }

    #[derive(Default)]
    struct Swallow {
        errors: Vec<i64>,
    }

    impl Handler<u64> for Swallow {
        fn on_consume(&mut self, item: &mut u64, _seq: i64, _remaining: usize) -> Result<Consumed, BoxError> {
            match *item {
                0 => Ok(Consumed::Exit),
                n if n % 2 == 1 => Err(format!("odd {n}").into()),
                _ => Ok(Consumed::Release),
            }
        }

        fn on_exception(&mut self, _error: BoxError, seq: i64) -> Result<()> {
            self.errors.push(seq);
            Ok(())
        }
    }

    #[test]
    fn handled_exception_continues() {
        let mut items = [0u64; 8];
        let ring = Ring::new(&mut items).unwrap();
        let (master, barrier) = (OffsetBarrier::new(), OffsetBarrier::new());
        let wait = SpinsStrategy;
        let p = Spmc::new(&master, 8, &wait).unwrap();
        let c = Consumer::new(&barrier, &p);
        p.add(c.cursor());

        let end = p.claim(5);
        for (seq, value) in (0..end).zip([2u64, 3, 4, 5, 0]) {
            unsafe { *ring.get_mut(seq) = value };
        }
        p.publish_range(0, end);

        let mut handler = Swallow::default();
        Batch::new(&c, ring).run(&mut handler).unwrap();
        assert_eq!(handler.errors, vec![1, 3]);
        assert_eq!(c.last(), 4);
    }
}
