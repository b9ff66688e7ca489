//! Power-of-two circular view over item storage.
//!
//! The ring does not own its items: they live in a caller buffer or in the
//! item region of a graph. Which positions a thread may touch is decided by
//! the sequencer and consumer barriers, not by the ring.

use crate::error::{DisruptorError, Result};
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Fixed-capacity circular view mapping sequence numbers to slots.
///
/// The size must be a power of 2, so that `seq & mask` replaces `seq % size`.
///
/// # How Indexing Works
///
/// With `size = 8` (mask = 7 = `0b111`):
/// ```text
/// seq =  0 → 0 & 7 = 0
/// seq =  5 → 5 & 7 = 5
/// seq =  8 → 8 & 7 = 0  (wraps around)
/// seq = 15 → 15 & 7 = 7
/// ```
pub struct Ring<'a, T> {
    data: NonNull<T>,
    mask: usize,
    _items: PhantomData<&'a [UnsafeCell<T>]>,
}

impl<T> Clone for Ring<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ring<'_, T> {}

impl<T> fmt::Debug for Ring<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("data", &self.data)
            .field("len", &self.len())
            .finish()
    }
}

// SAFETY: access to a slot is serialized by the claim/consume protocol; the
// ring itself only hands out addresses.
unsafe impl<T: Send> Send for Ring<'_, T> {}
unsafe impl<T: Send> Sync for Ring<'_, T> {}

impl<'a, T> Ring<'a, T> {
    /// Ring over a caller buffer.
    ///
    /// # Errors
    /// [`DisruptorError::NotPowerOfTwo`] if `items.len()` is not a power of 2.
    ///
    /// # Example
    /// ```
    /// use basalt_disruptor::Ring;
    /// let mut items = [0u64; 8];
    /// let ring = Ring::new(&mut items).unwrap();
    /// assert_eq!(ring.index(13), 5);
    /// ```
    pub fn new(items: &'a mut [T]) -> Result<Self> {
        // SAFETY: the exclusive borrow covers `items.len()` initialized values
        // for 'a.
        unsafe { Self::from_raw_parts(items.as_mut_ptr(), items.len()) }
    }

    /// Ring over raw storage.
    ///
    /// # Safety
    /// `data` must point to `size` initialized values that stay valid for
    /// `'a`, and nothing outside the claim/consume protocol may access them.
    ///
    /// # Errors
    /// [`DisruptorError::NullStorage`] for a null pointer,
    /// [`DisruptorError::NotPowerOfTwo`] for a size that is not a power of 2.
    pub unsafe fn from_raw_parts(data: *mut T, size: usize) -> Result<Self> {
        let data = NonNull::new(data).ok_or(DisruptorError::NullStorage)?;
        if !size.is_power_of_two() {
            return Err(DisruptorError::NotPowerOfTwo {
                what: "ring size",
                value: size,
            });
        }
        Ok(Self {
            data,
            mask: size - 1,
            _items: PhantomData,
        })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.mask + 1
    }

    /// Always `false`: a ring has at least one slot.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline(always)]
    pub fn index(&self, seq: i64) -> usize {
        (seq as usize) & self.mask
    }

    /// Address of the slot for `seq`.
    #[inline(always)]
    pub fn slot(&self, seq: i64) -> *mut T {
        // SAFETY: the index is masked into [0, len).
        unsafe { self.data.as_ptr().add(self.index(seq)) }
    }

    /// # Safety
    /// The caller must hold `seq` as a consumer (published, not yet released)
    /// and no producer may have claimed the same slot.
    #[inline(always)]
    pub unsafe fn get(&self, seq: i64) -> &'a T {
        // SAFETY: see the function contract.
        unsafe { &*self.slot(seq) }
    }

    /// # Safety
    /// The caller must have exclusive access to `seq`: a claimed, unpublished
    /// position, or a consumed one no other consumer reads.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, seq: i64) -> &'a mut T {
        // SAFETY: see the function contract.
        unsafe { &mut *self.slot(seq) }
    }
}
