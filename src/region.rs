use std::{ptr, ptr::NonNull, slice};

use crate::block::{Block, HEADER_SIZE, payload_of};

/// The byte range a heap carves into blocks.
///
/// Blocks are addressed by offsets from `base`. Every header access and
/// payload slice is checked against `len` before memory is touched.
#[derive(Debug)]
pub struct Region {
  base: NonNull<u8>,
  len: usize,
}

impl Region {
  /// # Safety
  ///
  /// `base` must point to `len` writable bytes, aligned to 8, that stay
  /// valid and unaliased for the lifetime of the region.
  pub unsafe fn new(
    base: NonNull<u8>,
    len: usize,
  ) -> Self {
    Self { base, len }
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn contains_header(
    &self,
    offset: usize,
  ) -> bool {
    offset
      .checked_add(HEADER_SIZE)
      .is_some_and(|end| end <= self.len)
  }

  /// Offset of `address` from the region base, if it lies inside the region.
  pub fn offset_of(
    &self,
    address: *const u8,
  ) -> Option<usize> {
    (address as usize)
      .checked_sub(self.base.as_ptr() as usize)
      .filter(|&offset| offset < self.len)
  }

  pub fn read(
    &self,
    offset: usize,
  ) -> Block {
    assert!(
      self.contains_header(offset),
      "block header at {offset:#x} lies outside the region"
    );
    unsafe { self.base.as_ptr().add(offset).cast::<Block>().read_unaligned() }
  }

  pub fn write(
    &mut self,
    offset: usize,
    block: Block,
  ) {
    assert!(
      self.contains_header(offset),
      "block header at {offset:#x} lies outside the region"
    );
    unsafe { self.base.as_ptr().add(offset).cast::<Block>().write_unaligned(block) }
  }

  /// Pointer handed to callers for the block whose header sits at `offset`.
  pub fn payload_ptr(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    assert!(self.contains_header(offset));
    unsafe { self.base.add(payload_of(offset)) }
  }

  /// The first `len` payload bytes of the block at `offset`.
  pub fn payload_mut(
    &mut self,
    offset: usize,
    len: usize,
  ) -> &mut [u8] {
    self.check_payload(offset, len);
    unsafe { slice::from_raw_parts_mut(self.payload_ptr(offset).as_ptr(), len) }
  }

  /// Copies `count` payload bytes from the block at `from` to the block at `to`.
  pub fn copy_payload(
    &mut self,
    from: usize,
    to: usize,
    count: usize,
  ) {
    self.check_payload(from, count);
    self.check_payload(to, count);
    unsafe {
      ptr::copy(
        self.payload_ptr(from).as_ptr(),
        self.payload_ptr(to).as_ptr(),
        count,
      )
    }
  }

  fn check_payload(
    &self,
    offset: usize,
    len: usize,
  ) {
    let end = payload_of(offset).checked_add(len);
    assert!(
      end.is_some_and(|end| end <= self.len),
      "payload of {len} bytes at {offset:#x} overruns the region"
    );
  }
}
