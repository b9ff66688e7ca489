//! Wait strategies: how a claimer or consumer idles until a position becomes
//! available.
//!
//! | Strategy          | Idle behaviour                          | Cross-process |
//! |-------------------|-----------------------------------------|---------------|
//! | [`SpinsStrategy`] | exponential busy-wait, then yield/sleep | yes           |
//! | [`YieldStrategy`] | bounded spin, then `yield_now`          | yes           |
//! | [`BlockStrategy`] | mutex + condition variable              | no            |
//! | [`ShareStrategy`] | process-shared pthread mutex + condvar  | yes           |
//!
//! Every `wait` returns the bound it observed, which may be beyond the
//! requested target. Callers consume up to that bound to batch.

use crate::error::{DisruptorError, Result};
use crate::sequence::Gate;
use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};
use std::time::Duration;

/// Exponential back-off used by spinning waits and MPMC claims.
///
/// Rounds below [`Spinner::LIMIT`] busy-wait `2 << round` pause hints. Later
/// rounds yield the thread, and round [`Spinner::SLEEP`] sleeps for one
/// nanosecond before dropping back to yielding.
#[derive(Debug, Clone)]
pub struct Spinner {
    round: u32,
}

impl Spinner {
    pub const LIMIT: u32 = 10;
    pub const SLEEP: u32 = 20;

    pub fn new() -> Self {
        // Busy-waiting on a single CPU only delays whoever we wait for.
        static START: OnceLock<u32> = OnceLock::new();
        let round = *START.get_or_init(|| {
            match std::thread::available_parallelism() {
                Ok(n) if n.get() > 1 => 0,
                _ => Self::LIMIT,
            }
        });
        Self { round }
    }

    #[inline]
    pub fn once(&mut self) {
        if self.round < Self::LIMIT {
            for _ in 0..(2u32 << self.round) {
                std::hint::spin_loop();
            }
        } else if self.round == Self::SLEEP {
            self.round = Self::LIMIT - 1;
            std::thread::sleep(Duration::from_nanos(1));
        } else {
            std::thread::yield_now();
        }
        self.round += 1;
    }
}

impl Default for Spinner {
    fn default() -> Self {
        Self::new()
    }
}

/// How a claimer or consumer waits for `gate` to reach a target position.
pub trait WaitStrategy: Send + Sync + Sized {
    /// Short tag shown in descriptions.
    const KIND: &'static str;

    /// Constructs a strategy at `place`, which may be shared memory.
    ///
    /// # Safety
    /// `place` must be valid for writes and aligned for `Self`, and the value
    /// must not move afterwards.
    unsafe fn init_in_place(place: *mut Self) -> Result<()>;

    /// Heap-allocated instance for in-process use.
    fn boxed() -> Result<Box<Self>> {
        let mut place = Box::<Self>::new_uninit();
        // SAFETY: a fresh, aligned allocation that never moves.
        unsafe {
            Self::init_in_place(place.as_mut_ptr())?;
            Ok(place.assume_init())
        }
    }

    /// Blocks until `gate.position() >= target`; returns the observed position.
    fn wait<G: Gate + ?Sized>(&self, target: i64, gate: &G) -> i64;

    /// Wakes every parked waiter. Called after each publish and release.
    fn signal_all_when_blocking(&self);
}

/// Busy-spin with exponential back-off.
#[derive(Debug, Default)]
pub struct SpinsStrategy;

impl WaitStrategy for SpinsStrategy {
    const KIND: &'static str = "Spins";

    unsafe fn init_in_place(place: *mut Self) -> Result<()> {
        // SAFETY: guaranteed by the caller.
        unsafe { place.write(Self) };
        Ok(())
    }

    #[inline]
    fn wait<G: Gate + ?Sized>(&self, target: i64, gate: &G) -> i64 {
        let mut spinner = Spinner::new();
        loop {
            let position = gate.position();
            if position >= target {
                return position;
            }
            spinner.once();
        }
    }

    #[inline(always)]
    fn signal_all_when_blocking(&self) {}
}

/// Spins `spin_tries` times, then yields between checks.
#[derive(Debug)]
pub struct YieldStrategy {
    spin_tries: usize,
}

impl YieldStrategy {
    pub const SPIN_TRIES: usize = 10;
}

impl Default for YieldStrategy {
    fn default() -> Self {
        Self {
            spin_tries: Self::SPIN_TRIES,
        }
    }
}

impl WaitStrategy for YieldStrategy {
    const KIND: &'static str = "Yield";

    unsafe fn init_in_place(place: *mut Self) -> Result<()> {
        // SAFETY: guaranteed by the caller.
        unsafe { place.write(Self::default()) };
        Ok(())
    }

    #[inline]
    fn wait<G: Gate + ?Sized>(&self, target: i64, gate: &G) -> i64 {
        let mut counter = self.spin_tries;
        loop {
            let position = gate.position();
            if position >= target {
                return position;
            }
            if counter == 0 {
                std::thread::yield_now();
            } else {
                counter -= 1;
                std::hint::spin_loop();
            }
        }
    }

    #[inline(always)]
    fn signal_all_when_blocking(&self) {}
}

/// Parks waiters on a condition variable. In-process only.
#[derive(Debug, Default)]
pub struct BlockStrategy {
    mutex: Mutex<()>,
    cond: Condvar,
}

impl WaitStrategy for BlockStrategy {
    const KIND: &'static str = "Block";

    unsafe fn init_in_place(place: *mut Self) -> Result<()> {
        // SAFETY: guaranteed by the caller.
        unsafe { place.write(Self::default()) };
        Ok(())
    }

    fn wait<G: Gate + ?Sized>(&self, target: i64, gate: &G) -> i64 {
        let mut position = gate.position();
        if position >= target {
            return position;
        }
        let guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .cond
            .wait_while(guard, |_| {
                position = gate.position();
                position < target
            })
            .unwrap_or_else(PoisonError::into_inner);
        position
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}

/// Process-shared pthread mutex and condition variable; the only blocking
/// strategy allowed in shared memory.
#[repr(C)]
pub struct ShareStrategy {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: the pthread objects are initialized PTHREAD_PROCESS_SHARED and are
// only touched through pthread calls, which synchronize internally.
unsafe impl Send for ShareStrategy {}
unsafe impl Sync for ShareStrategy {}

fn check(op: &'static str, rc: libc::c_int) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(DisruptorError::Os {
            op,
            source: io::Error::from_raw_os_error(rc),
        })
    }
}

impl ShareStrategy {
    fn lock(&self) {
        // SAFETY: initialized in init_in_place, never moved.
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        assert_eq!(rc, 0, "pthread_mutex_lock: {}", io::Error::from_raw_os_error(rc));
    }

    fn unlock(&self) {
        // SAFETY: held by this thread.
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.get()) };
        assert_eq!(rc, 0, "pthread_mutex_unlock: {}", io::Error::from_raw_os_error(rc));
    }
}

impl WaitStrategy for ShareStrategy {
    const KIND: &'static str = "Share";

    unsafe fn init_in_place(place: *mut Self) -> Result<()> {
        // SAFETY: `place` is valid and stays put (caller contract); the
        // attribute objects are initialized before use and destroyed after.
        unsafe {
            let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check("pthread_mutexattr_init", libc::pthread_mutexattr_init(mattr.as_mut_ptr()))?;
            let shared = libc::pthread_mutexattr_setpshared(
                mattr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            );
            let init = libc::pthread_mutex_init(
                UnsafeCell::raw_get(&raw const (*place).mutex),
                mattr.as_ptr(),
            );
            libc::pthread_mutexattr_destroy(mattr.as_mut_ptr());
            check("pthread_mutexattr_setpshared", shared)?;
            check("pthread_mutex_init", init)?;

            let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            check("pthread_condattr_init", libc::pthread_condattr_init(cattr.as_mut_ptr()))?;
            let shared =
                libc::pthread_condattr_setpshared(cattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
            let init = libc::pthread_cond_init(
                UnsafeCell::raw_get(&raw const (*place).cond),
                cattr.as_ptr(),
            );
            libc::pthread_condattr_destroy(cattr.as_mut_ptr());
            check("pthread_condattr_setpshared", shared)?;
            check("pthread_cond_init", init)?;
        }
        Ok(())
    }

    fn wait<G: Gate + ?Sized>(&self, target: i64, gate: &G) -> i64 {
        let mut position = gate.position();
        if position >= target {
            return position;
        }
        self.lock();
        loop {
            position = gate.position();
            if position >= target {
                break;
            }
            // SAFETY: the mutex is held by this thread.
            let rc = unsafe { libc::pthread_cond_wait(self.cond.get(), self.mutex.get()) };
            assert_eq!(rc, 0, "pthread_cond_wait: {}", io::Error::from_raw_os_error(rc));
        }
        self.unlock();
        position
    }

    fn signal_all_when_blocking(&self) {
        self.lock();
        // SAFETY: initialized condition variable.
        let rc = unsafe { libc::pthread_cond_broadcast(self.cond.get()) };
        self.unlock();
        assert_eq!(rc, 0, "pthread_cond_broadcast: {}", io::Error::from_raw_os_error(rc));
    }
}

impl Drop for ShareStrategy {
    fn drop(&mut self) {
        // SAFETY: no waiter can hold a reference once we are dropped.
        unsafe {
            libc::pthread_cond_destroy(self.cond.get());
            libc::pthread_mutex_destroy(self.mutex.get());
        }
    }
}
