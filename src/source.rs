use std::{
  alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

/// Supplier of the one contiguous byte range a [`Heap`](crate::Heap) manages.
///
/// The heap calls [`acquire`](RegionSource::acquire) at most once, on its first
/// allocation, and keeps the returned range for as long as it lives.
pub trait RegionSource {
  /// Returns the start of `byte_count` freshly committed bytes, or `None` if
  /// the request cannot be satisfied.
  fn acquire(
    &mut self,
    byte_count: isize,
  ) -> Option<NonNull<u8>>;
}

/// Extends the process data segment with `sbrk(2)`.
///
/// Memory obtained this way is never handed back; the program break only
/// moves forward.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl Sbrk {
  /// Current program break, i.e. the result of `sbrk(0)`.
  pub fn program_break() -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }
}

impl RegionSource for Sbrk {
  fn acquire(
    &mut self,
    byte_count: isize,
  ) -> Option<NonNull<u8>> {
    if byte_count <= 0 {
      return None;
    }

    let address = unsafe { sbrk(byte_count as intptr_t) };

    if address == usize::MAX as *mut c_void {
      return None;
    }

    NonNull::new(address as *mut u8)
  }
}

/// An 8-byte aligned buffer owned by the heap itself.
///
/// Gives every heap its own isolated region, which is what tests and
/// embedders that do not want to touch the program break use. The bytes live
/// in their own allocation, so pointers into them stay valid when the buffer
/// (or the heap holding it) is moved.
#[derive(Debug)]
pub struct OwnedBuffer {
  base: NonNull<u8>,
  len: usize,
  handed_out: bool,
}

impl OwnedBuffer {
  const ALIGN: usize = 8;

  /// Allocates `byte_len` zeroed bytes, rounded up to a multiple of 8.
  pub fn new(byte_len: usize) -> Self {
    let Some(layout) = byte_len
      .checked_next_multiple_of(Self::ALIGN)
      .and_then(|len| Layout::from_size_align(len, Self::ALIGN).ok())
    else {
      panic!("owned buffer of {byte_len} bytes exceeds the address space");
    };

    let base = if layout.size() == 0 {
      NonNull::dangling()
    } else {
      let address = unsafe { alloc_zeroed(layout) };
      NonNull::new(address).unwrap_or_else(|| handle_alloc_error(layout))
    };

    Self {
      base,
      len: layout.size(),
      handed_out: false,
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl RegionSource for OwnedBuffer {
  fn acquire(
    &mut self,
    byte_count: isize,
  ) -> Option<NonNull<u8>> {
    let wanted = usize::try_from(byte_count).ok()?;

    if self.handed_out || wanted == 0 || wanted > self.len {
      return None;
    }

    self.handed_out = true;
    Some(self.base)
  }
}

impl Drop for OwnedBuffer {
  fn drop(&mut self) {
    if self.len == 0 {
      return;
    }

    // `new` already validated this layout.
    if let Ok(layout) = Layout::from_size_align(self.len, Self::ALIGN) {
      unsafe { dealloc(self.base.as_ptr(), layout) };
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_owned_buffer_hands_out_once() {
    let mut buffer = OwnedBuffer::new(100);
    assert_eq!(buffer.len(), 104);

    assert!(buffer.acquire(200).is_none());
    assert!(buffer.acquire(-1).is_none());

    let first = buffer.acquire(104).unwrap();
    assert_eq!(first.as_ptr() as usize % 8, 0);

    assert!(buffer.acquire(8).is_none());
  }

  #[test]
  fn test_owned_buffer_is_zeroed_and_stable_across_moves() {
    let mut buffer = OwnedBuffer::new(64);
    let base = buffer.acquire(64).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts_mut(base.as_ptr(), 64) };
    assert!(bytes.iter().all(|&byte| byte == 0));
    bytes[63] = 0xAB;

    let moved = Box::new(buffer);

    assert_eq!(unsafe { base.as_ptr().add(63).read() }, 0xAB);
    assert_eq!(moved.len(), 64);
  }

  #[test]
  fn test_empty_owned_buffer_hands_out_nothing() {
    let mut buffer = OwnedBuffer::new(0);
    assert!(buffer.is_empty());
    assert!(buffer.acquire(8).is_none());
  }

  #[test]
  fn test_sbrk_rejects_non_positive_requests() {
    let mut source = Sbrk;
    assert!(source.acquire(0).is_none());
    assert!(source.acquire(-4096).is_none());
  }
}
