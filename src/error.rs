use thiserror::Error;

/// Failures reported by the heap at the call boundary.
///
/// None of these are fatal: the heap is left exactly as it was before the
/// failing call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  #[error("zero-sized allocation requested")]
  ZeroSize,

  #[error("out of memory (requested: {requested} bytes)")]
  OutOfMemory { requested: usize },

  #[error("free-space index is full (capacity: {capacity})")]
  IndexFull { capacity: usize },

  #[error("pointer {addr:#x} does not address a block of this heap")]
  InvalidPointer { addr: usize },

  #[error("pointer {addr:#x} addresses a block that is not allocated")]
  NotAllocated { addr: usize },

  #[error("managed region of {size} bytes could not be reserved")]
  RegionUnavailable { size: usize },
}

pub type Result<T> = core::result::Result<T, HeapError>;
