use std::mem;

/// Size of the metadata prefix in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Smallest free remainder a split may leave behind: a header plus 16 usable bytes.
pub const MIN_SPLIT_REMAINDER: usize = HEADER_SIZE + 16;

/// Value of [`Block::next`] for the last block of the region.
pub const NO_NEXT: usize = usize::MAX;

/// Header stored in the region immediately before each payload.
///
/// `next` is the byte offset of the following block from the region base,
/// never a raw pointer, so a header can be copied out and inspected without
/// touching the rest of the heap.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  pub size: usize,
  pub requested_size: usize,
  pub is_free: bool,
  pub next: usize,
}

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    next: Option<usize>,
  ) -> Self {
    Self {
      size,
      requested_size: 0,
      is_free,
      next: next.unwrap_or(NO_NEXT),
    }
  }

  pub fn next(&self) -> Option<usize> {
    (self.next != NO_NEXT).then_some(self.next)
  }

  /// Offset one past the last usable byte of a block starting at `offset`.
  pub fn end(
    &self,
    offset: usize,
  ) -> usize {
    offset + HEADER_SIZE + self.size
  }
}

/// Offset of the payload belonging to the header at `offset`.
pub fn payload_of(offset: usize) -> usize {
  offset + HEADER_SIZE
}

/// Offset of the header owning the payload at `payload`, if there is room for one.
pub fn header_of(payload: usize) -> Option<usize> {
  payload.checked_sub(HEADER_SIZE)
}
