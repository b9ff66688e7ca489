//! Fixed-width sets of weak references to [`Sequence`]s.
//!
//! A [`Group`] is the "depends-on" edge set of one node in a topology. It
//! never owns the sequences it points at: the caller keeps them alive (in a
//! graph they live in the same backing memory as the barrier itself).

use crate::error::{DisruptorError, Result};
use crate::sequence::Sequence;
use std::fmt;
use std::ptr;

/// Maximum number of dependencies of one barrier.
pub const GROUP_WIDTH: usize = 8;

/// Unordered set of up to [`GROUP_WIDTH`] sequence references; empty slots
/// are null.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Group {
    items: [*const Sequence; GROUP_WIDTH],
}

impl Default for Group {
    fn default() -> Self {
        Self {
            items: [ptr::null(); GROUP_WIDTH],
        }
    }
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a group from a list of sequences.
    ///
    /// # Errors
    /// [`DisruptorError::DependencyLimit`] if more than [`GROUP_WIDTH`]
    /// sequences are given.
    pub fn of(sequences: &[&Sequence]) -> Result<Self> {
        if sequences.len() > GROUP_WIDTH {
            return Err(DisruptorError::DependencyLimit { max: GROUP_WIDTH });
        }
        let mut group = Self::default();
        for s in sequences {
            group.add(s);
        }
        Ok(group)
    }

    /// Number of non-empty entries.
    pub fn size(&self) -> usize {
        self.items.iter().filter(|p| !p.is_null()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// `false` for null.
    pub fn contains(&self, seq: *const Sequence) -> bool {
        !seq.is_null() && self.items.contains(&seq)
    }

    pub fn add(&mut self, seq: &Sequence) -> bool {
        self.replace(ptr::null(), seq)
    }

    pub fn del(&mut self, seq: &Sequence) -> bool {
        self.replace(seq, ptr::null())
    }

    /// Swaps the first entry equal to `removable` for `desired`. Passing null
    /// as `removable` fills the first empty entry; passing null as `desired`
    /// deletes.
    pub fn replace(&mut self, removable: *const Sequence, desired: *const Sequence) -> bool {
        match self.items.iter_mut().find(|p| ptr::eq(**p, removable)) {
            Some(entry) => {
                *entry = desired;
                true
            }
            None => false,
        }
    }

    /// Non-empty entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = *const Sequence> + '_ {
        self.items.iter().copied().filter(|p| !p.is_null())
    }

    pub(crate) fn raw(&self) -> &[*const Sequence; GROUP_WIDTH] {
        &self.items
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_fills_up_to_width() {
        let seqs: Vec<Sequence> = (0..=GROUP_WIDTH as i64).map(Sequence::new).collect();
        let mut g = Group::new();
        assert!(g.is_empty());
        for s in &seqs[..GROUP_WIDTH] {
            assert!(g.add(s));
        }
        assert_eq!(g.size(), GROUP_WIDTH);
        assert!(!g.add(&seqs[GROUP_WIDTH]));
    }

    #[test]
    fn del_and_contains() {
        let (a, b) = (Sequence::new(1), Sequence::new(2));
        let mut g = Group::of(&[&a, &b]).unwrap();
        assert!(g.contains(&a));
        assert!(!g.contains(ptr::null()));
        assert!(g.del(&a));
        assert!(!g.del(&a));
        assert!(!g.contains(&a));
        assert_eq!(g.size(), 1);
    }

    #[test]
    fn replace_swaps_first_match() {
        let (a, b, c) = (Sequence::new(1), Sequence::new(2), Sequence::new(3));
        let mut g = Group::of(&[&a, &b]).unwrap();
        assert!(g.replace(&b, &c));
        assert_eq!(g.iter().collect::<Vec<_>>(), vec![&a as *const _, &c as *const _]);
        assert!(!g.replace(&b, &a));
    }

    #[test]
    fn of_rejects_too_many() {
        let seqs: Vec<Sequence> = (0..9).map(Sequence::new).collect();
        let refs: Vec<&Sequence> = seqs.iter().collect();
        let err = Group::of(&refs).unwrap_err();
        assert_eq!(err.to_string(), "dependencies list exceeds limit: 8");
    }
}
