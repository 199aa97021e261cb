//! Size-keyed index over the free blocks of a heap.
//!
//! ```text
//!   Storage (breadth-first):   [ 40 | 96 | 64 | 512 | 128 ]
//!                                 0    1    2    3     4
//!
//!                      40
//!                    /    \
//!                  96      64
//!                 /  \
//!               512  128
//! ```
//!
//! Slot 0 always holds the smallest free block. Each entry caches the size of
//! its block; a block is always removed from the index before its header is
//! resized, so the cached value never goes stale.

use std::slice;

use log::warn;

use crate::{
  config::FitPolicy,
  error::{HeapError, Result},
};

/// One free block: its header offset and usable size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeEntry {
  pub offset: usize,
  pub size: usize,
}

/// A child slot whose size is smaller than its parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapOrderViolation {
  pub parent: usize,
  pub child: usize,
}

/// Array-backed binary min-heap of [`FreeEntry`] keyed by size.
#[derive(Debug)]
pub struct FreeIndex {
  slots: Vec<FreeEntry>,
  capacity: Option<usize>,
  policy: FitPolicy,
}

impl FreeIndex {
  pub fn new(
    capacity: Option<usize>,
    policy: FitPolicy,
  ) -> Self {
    Self {
      slots: Vec::with_capacity(capacity.unwrap_or_default()),
      capacity,
      policy,
    }
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn capacity(&self) -> Option<usize> {
    self.capacity
  }

  pub fn is_full(&self) -> bool {
    self.capacity.is_some_and(|capacity| self.slots.len() >= capacity)
  }

  /// The smallest indexed block.
  pub fn peek(&self) -> Option<&FreeEntry> {
    self.slots.first()
  }

  /// Entries in storage order.
  pub fn iter(&self) -> slice::Iter<'_, FreeEntry> {
    self.slots.iter()
  }

  pub fn contains(
    &self,
    offset: usize,
  ) -> bool {
    self.slots.iter().any(|entry| entry.offset == offset)
  }

  pub fn insert(
    &mut self,
    entry: FreeEntry,
  ) -> Result<()> {
    if let Some(capacity) = self.capacity.filter(|_| self.is_full()) {
      warn!("free-space index is full, block at {:#x} not indexed", entry.offset);
      return Err(HeapError::IndexFull { capacity });
    }

    self.slots.push(entry);
    self.sift_up(self.slots.len() - 1);
    Ok(())
  }

  /// Takes an entry of at least `min_size` bytes out of the index.
  pub fn extract_fitting(
    &mut self,
    min_size: usize,
  ) -> Option<FreeEntry> {
    let slot = match self.policy {
      FitPolicy::StorageOrder => self.slots.iter().position(|entry| entry.size >= min_size),
      FitPolicy::BestFit => self
        .slots
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.size >= min_size)
        .min_by_key(|(slot, entry)| (entry.size, *slot))
        .map(|(slot, _)| slot),
    }?;

    Some(self.take(slot))
  }

  /// Removes the entry for the block at `offset`, if there is one.
  pub fn remove(
    &mut self,
    offset: usize,
  ) -> Option<FreeEntry> {
    let slot = self.slots.iter().position(|entry| entry.offset == offset)?;
    Some(self.take(slot))
  }

  pub fn heap_violations(&self) -> Vec<HeapOrderViolation> {
    (1..self.slots.len())
      .map(|child| HeapOrderViolation {
        parent: (child - 1) / 2,
        child,
      })
      .filter(|pair| self.slots[pair.child].size < self.slots[pair.parent].size)
      .collect()
  }

  fn take(
    &mut self,
    slot: usize,
  ) -> FreeEntry {
    let entry = self.slots.swap_remove(slot);

    if slot < self.slots.len() {
      // The former last entry may be smaller than the parent of its new slot.
      let settled = self.sift_down(slot);
      self.sift_up(settled);
    }

    entry
  }

  fn sift_up(
    &mut self,
    mut index: usize,
  ) {
    while index > 0 {
      let parent = (index - 1) / 2;

      if self.slots[parent].size <= self.slots[index].size {
        break;
      }

      self.slots.swap(parent, index);
      index = parent;
    }
  }

  /// Returns the slot the entry at `index` settled in.
  fn sift_down(
    &mut self,
    mut index: usize,
  ) -> usize {
    loop {
      let left = 2 * index + 1;
      let right = left + 1;
      let mut smallest = index;

      if left < self.slots.len() && self.slots[left].size < self.slots[smallest].size {
        smallest = left;
      }

      if right < self.slots.len() && self.slots[right].size < self.slots[smallest].size {
        smallest = right;
      }

      if smallest == index {
        return index;
      }

      self.slots.swap(index, smallest);
      index = smallest;
    }
  }
}
