//! The update lock: a state tag swapped to `Updating` by compare-and-swap.
//!
//! No OS primitive is involved, so the lock works the same between threads
//! and between processes mapping one region. Waiting is a bounded sleep per
//! [`RetryPolicy`].

use super::options::RetryPolicy;
use super::vla::State;
use crate::error::{DisruptorError, Result};
use std::sync::atomic::{AtomicU8, Ordering};

/// Holds `Updating` until dropped, then stores the restore state.
pub(crate) struct UpdateLock<'a> {
    state: &'a AtomicU8,
    previous: State,
    restore: State,
}

impl<'a> UpdateLock<'a> {
    /// Swaps `expected` for `Updating`, retrying per `policy`.
    ///
    /// # Errors
    /// [`DisruptorError::StateTimeout`] with the last observed state, or
    /// [`DisruptorError::Corrupted`] if that state is not a valid tag.
    pub fn acquire(state: &'a AtomicU8, expected: State, policy: RetryPolicy) -> Result<Self> {
        let mut observed = expected as u8;
        let locked = policy.run(|| {
            Self::try_acquire(state, expected)
                .map_err(|current| observed = current)
                .ok()
        });
        match locked {
            Some(lock) => Ok(lock),
            None => Err(DisruptorError::StateTimeout {
                state: State::try_from(observed)?,
                policy,
            }),
        }
    }

    /// One attempt; the observed tag when the state is not `expected`.
    pub fn try_acquire(state: &'a AtomicU8, expected: State) -> Result<Self, u8> {
        state
            .compare_exchange(
                expected as u8,
                State::Updating as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| Self {
                state,
                previous: expected,
                restore: expected,
            })
    }

    /// State the lock was taken from.
    pub fn previous(&self) -> State {
        self.previous
    }

    /// State stored on release instead of the previous one.
    pub fn restore(&mut self, state: State) {
        self.restore = state;
    }
}

impl Drop for UpdateLock<'_> {
    fn drop(&mut self) {
        self.state.store(self.restore as u8, Ordering::Release);
    }
}
