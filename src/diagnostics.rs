//! Read-only views of heap state for tests and operators.

use std::{collections::HashSet, fmt};

use log::debug;
use thiserror::Error;

use crate::{
  align::ALIGNMENT,
  block::HEADER_SIZE,
  heap::Heap,
  index::{FreeEntry, HeapOrderViolation},
  source::RegionSource,
};

/// One block as seen by [`HeapReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub offset: usize,
  pub address: usize,
  pub size: usize,
  pub requested_size: usize,
  pub is_free: bool,
}

/// Every block in address order plus aggregate totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapReport {
  pub start: Option<usize>,
  pub region_size: usize,
  pub blocks: Vec<BlockInfo>,
  pub total_free: usize,
  pub total_used: usize,
  pub indexed: usize,
}

impl HeapReport {
  pub fn free_blocks(&self) -> impl Iterator<Item = &BlockInfo> {
    self.blocks.iter().filter(|block| block.is_free)
  }
}

impl fmt::Display for HeapReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Heap Status:")?;
    match self.start {
      Some(start) => writeln!(f, "Heap Start: {start:#x}")?,
      None => writeln!(f, "Heap Start: (not reserved)")?,
    }

    for (i, block) in self.blocks.iter().enumerate() {
      writeln!(
        f,
        "Block {i}: addr={:#x} size={} ({} requested) is_free={}",
        block.address,
        block.size,
        block.requested_size,
        u8::from(block.is_free)
      )?;
    }

    writeln!(f, "Total free memory: {} bytes", self.total_free)?;
    writeln!(f, "Total allocated memory: {} bytes", self.total_used)?;
    writeln!(f, "Total heap size: {} bytes", self.region_size)?;
    writeln!(f, "Free blocks in minheap: {}", self.indexed)
  }
}

/// Free-space index contents in storage order and any heap-order inversions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
  pub entries: Vec<FreeEntry>,
  pub capacity: Option<usize>,
  pub violations: Vec<HeapOrderViolation>,
}

impl fmt::Display for IndexReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Minheap Status:")?;
    writeln!(f, "Number of free blocks: {}", self.entries.len())?;
    writeln!(f, "Minheap contents (storage order):")?;

    for (i, entry) in self.entries.iter().enumerate() {
      writeln!(f, "  Index {i}: offset={:#x} size={}", entry.offset, entry.size)?;
    }

    for violation in &self.violations {
      let side = if violation.child % 2 == 1 { "left" } else { "right" };
      writeln!(
        f,
        "WARNING: Heap property violation at index {} with {side} child",
        violation.parent
      )?;
    }

    if self.violations.is_empty() {
      writeln!(f, "Heap property verified: OK")
    } else {
      writeln!(
        f,
        "WARNING: Found {} heap property violations!",
        self.violations.len()
      )
    }
  }
}

/// A broken structural guarantee found by [`Heap::check_invariants`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
  #[error("block at {offset:#x} should start at {expected:#x}")]
  BrokenChain { offset: usize, expected: usize },

  #[error("block at {offset:#x} has unaligned size {size}")]
  UnalignedSize { offset: usize, size: usize },

  #[error("blocks end at {end:#x}, region ends at {region_end:#x}")]
  RegionNotCovered { end: usize, region_end: usize },

  #[error("free block at {offset:#x} is not indexed")]
  FreeNotIndexed { offset: usize },

  #[error("indexed block at {offset:#x} is not a free block")]
  IndexedNotFree { offset: usize },

  #[error("block at {offset:#x} is indexed more than once")]
  DuplicateEntry { offset: usize },

  #[error("index caches {cached} bytes for block at {offset:#x}, header says {actual}")]
  StaleSize {
    offset: usize,
    cached: usize,
    actual: usize,
  },

  #[error("index slot {child} is smaller than its parent slot {parent}")]
  HeapOrder { parent: usize, child: usize },
}

impl<S: RegionSource> Heap<S> {
  pub fn heap_report(&self) -> HeapReport {
    let start = self.region_start().map(|base| base.as_ptr() as usize);

    let blocks: Vec<BlockInfo> = self
      .blocks()
      .map(|(offset, block)| BlockInfo {
        offset,
        address: start.unwrap_or_default() + offset,
        size: block.size,
        requested_size: if block.is_free { 0 } else { block.requested_size },
        is_free: block.is_free,
      })
      .collect();

    let mut report = HeapReport {
      start,
      region_size: self.region_len().unwrap_or(self.config().region_size),
      blocks,
      total_free: 0,
      total_used: 0,
      indexed: self.free_index().map_or(0, |index| index.len()),
    };

    report.total_free = report.free_blocks().map(|block| block.size).sum();
    report.total_used = report
      .blocks
      .iter()
      .filter(|block| !block.is_free)
      .map(|block| block.size)
      .sum();

    report
  }

  pub fn index_report(&self) -> IndexReport {
    match self.free_index() {
      Some(index) => IndexReport {
        entries: index.iter().copied().collect(),
        capacity: index.capacity(),
        violations: index.heap_violations(),
      },
      None => IndexReport {
        entries: Vec::new(),
        capacity: self.config().index_capacity,
        violations: Vec::new(),
      },
    }
  }

  /// Verifies the block partition, index membership and heap order.
  pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
    let Some(region_end) = self.region_len() else {
      return Ok(());
    };

    let mut expected = 0;
    let mut free = HashSet::new();

    for (offset, block) in self.blocks() {
      if offset != expected {
        return Err(InvariantViolation::BrokenChain { offset, expected });
      }
      if block.size % ALIGNMENT != 0 {
        return Err(InvariantViolation::UnalignedSize {
          offset,
          size: block.size,
        });
      }
      if block.is_free {
        free.insert(offset);
      }
      expected = offset + HEADER_SIZE + block.size;
    }

    if expected != region_end {
      return Err(InvariantViolation::RegionNotCovered {
        end: expected,
        region_end,
      });
    }

    let Some(index) = self.free_index() else {
      return Ok(());
    };

    let mut seen = HashSet::new();
    for entry in index.iter() {
      if !seen.insert(entry.offset) {
        return Err(InvariantViolation::DuplicateEntry {
          offset: entry.offset,
        });
      }
      if !free.contains(&entry.offset) {
        return Err(InvariantViolation::IndexedNotFree {
          offset: entry.offset,
        });
      }
    }

    for (offset, block) in self.blocks().filter(|(_, block)| block.is_free) {
      let Some(entry) = index.iter().find(|entry| entry.offset == offset) else {
        return Err(InvariantViolation::FreeNotIndexed { offset });
      };
      if entry.size != block.size {
        return Err(InvariantViolation::StaleSize {
          offset,
          cached: entry.size,
          actual: block.size,
        });
      }
    }

    match index.heap_violations().first() {
      Some(violation) => Err(InvariantViolation::HeapOrder {
        parent: violation.parent,
        child: violation.child,
      }),
      None => Ok(()),
    }
  }

  /// Writes both reports to the log at debug level.
  pub fn log_status(&self) {
    debug!("{}", self.heap_report());
    debug!("{}", self.index_report());
  }
}
