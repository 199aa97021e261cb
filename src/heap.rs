use std::ptr::NonNull;

use log::{debug, error, trace, warn};

use crate::{
  align,
  align::ALIGNMENT,
  block::{Block, HEADER_SIZE, MIN_SPLIT_REMAINDER, header_of},
  config::Config,
  error::{HeapError, Result},
  index::{FreeEntry, FreeIndex},
  region::Region,
  source::{OwnedBuffer, RegionSource},
};

enum State {
  Uninitialized,
  Ready(Arena),
  Failed,
}

/// The reserved region together with the index of its free blocks.
struct Arena {
  region: Region,
  index: FreeIndex,
}

/// A first-fit, splitting and coalescing allocator over one fixed region.
///
/// The region is requested from `S` on the first call to
/// [`allocate`](Heap::allocate) and kept for the life of the heap; running
/// out of it is a plain allocation failure, never a reason to ask for more.
pub struct Heap<S: RegionSource> {
  source: S,
  config: Config,
  state: State,
}

impl Heap<OwnedBuffer> {
  /// A heap over a private buffer of `config.region_size` bytes.
  pub fn with_owned_buffer(config: Config) -> Self {
    Self::new(OwnedBuffer::new(config.region_size), config)
  }
}

impl<S: RegionSource> Heap<S> {
  pub const fn new(
    source: S,
    config: Config,
  ) -> Self {
    Self {
      source,
      config,
      state: State::Uninitialized,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn is_reserved(&self) -> bool {
    matches!(self.state, State::Ready(_))
  }

  /// Start of the managed region, once it has been reserved.
  pub fn region_start(&self) -> Option<NonNull<u8>> {
    self.arena().map(|arena| arena.region.base())
  }

  /// Length of the managed region, once it has been reserved.
  pub fn region_len(&self) -> Option<usize> {
    self.arena().map(|arena| arena.region.len())
  }

  pub fn free_index(&self) -> Option<&FreeIndex> {
    self.arena().map(|arena| &arena.index)
  }

  /// Blocks in address order as `(offset, header)` pairs.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      region: self.arena().map(|arena| &arena.region),
      cursor: Some(0),
    }
  }

  /// Allocates at least `requested_size` zeroed bytes.
  pub fn allocate(
    &mut self,
    requested_size: usize,
  ) -> Result<NonNull<u8>> {
    if requested_size == 0 {
      return Err(HeapError::ZeroSize);
    }

    let arena = self.ensure_reserved()?;
    let offset = arena.grant(requested_size)?;

    Ok(arena.region.payload_ptr(offset))
  }

  /// Returns the block behind `address` to the heap. Null is ignored.
  pub fn release(
    &mut self,
    address: *mut u8,
  ) -> Result<()> {
    if address.is_null() {
      return Ok(());
    }

    let arena = self.arena_for(address)?;
    let offset = arena.locate(address)?;

    arena.release(offset)
  }

  /// Resizes the allocation behind `address`, moving it if it has to grow.
  ///
  /// Null behaves like [`allocate`](Heap::allocate) and a `new_size` of zero
  /// like [`release`](Heap::release), which yields `Ok(None)`. When growing
  /// fails the original allocation is left untouched and still valid.
  pub fn resize(
    &mut self,
    address: *mut u8,
    new_size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    if address.is_null() {
      return self.allocate(new_size).map(Some);
    }

    if new_size == 0 {
      return self.release(address).map(|()| None);
    }

    let arena = self.arena_for(address)?;
    let offset = arena.locate(address)?;

    arena.resize(offset, new_size).map(|offset| Some(arena.region.payload_ptr(offset)))
  }

  /// Usable capacity of the allocation behind `address`.
  pub fn usable_size(
    &self,
    address: *const u8,
  ) -> Result<usize> {
    let arena = self
      .arena()
      .ok_or(HeapError::InvalidPointer { addr: address as usize })?;
    let offset = arena.locate(address)?;
    let block = arena.region.read(offset);

    if block.is_free {
      return Err(HeapError::NotAllocated { addr: address as usize });
    }

    Ok(block.size)
  }

  fn arena(&self) -> Option<&Arena> {
    match &self.state {
      State::Ready(arena) => Some(arena),
      _ => None,
    }
  }

  fn arena_for(
    &mut self,
    address: *const u8,
  ) -> Result<&mut Arena> {
    match &mut self.state {
      State::Ready(arena) => Ok(arena),
      _ => {
        warn!("{address:p} does not belong to this heap: nothing reserved yet");
        Err(HeapError::InvalidPointer { addr: address as usize })
      }
    }
  }

  fn ensure_reserved(&mut self) -> Result<&mut Arena> {
    if let State::Uninitialized = self.state {
      self.state = match self.reserve() {
        Some(arena) => State::Ready(arena),
        None => State::Failed,
      };
    }

    match &mut self.state {
      State::Ready(arena) => Ok(arena),
      _ => Err(HeapError::RegionUnavailable {
        size: self.config.region_size,
      }),
    }
  }

  fn reserve(&mut self) -> Option<Arena> {
    let size = self.config.region_size;

    let Ok(byte_count) = isize::try_from(size) else {
      error!("failed to initialize heap: {size} bytes exceeds isize::MAX");
      return None;
    };

    let Some(base) = self.source.acquire(byte_count) else {
      error!("failed to initialize heap: region source refused {size} bytes");
      return None;
    };

    let padding = base.as_ptr().align_offset(ALIGNMENT);
    let usable = size
      .checked_sub(padding + HEADER_SIZE)
      .map(|usable| usable & !(ALIGNMENT - 1))
      .filter(|&usable| usable > 0);

    let Some(usable) = usable else {
      error!("failed to initialize heap: {size} bytes cannot hold a single block");
      return None;
    };

    // SAFETY: the source committed `size` bytes at `base`; the region starts
    // `padding` bytes in and ends no later than `base + size`.
    let mut region = unsafe { Region::new(base.add(padding), HEADER_SIZE + usable) };
    let mut index = FreeIndex::new(self.config.index_capacity, self.config.fit_policy);

    region.write(0, Block::new(usable, true, None));
    if let Err(err) = index.insert(FreeEntry {
      offset: 0,
      size: usable,
    }) {
      error!("failed to initialize heap: {err}");
      return None;
    }

    debug!(
      "heap initialized with size: {} bytes at address: {:p}",
      region.len(),
      region.base()
    );

    Some(Arena { region, index })
  }
}

impl Arena {
  /// Header offset of the live block whose payload starts at `address`.
  fn locate(
    &self,
    address: *const u8,
  ) -> Result<usize> {
    let invalid = HeapError::InvalidPointer { addr: address as usize };

    let Some(header) = self.region.offset_of(address).and_then(header_of) else {
      warn!("invalid free: {address:p} lies outside the heap range");
      return Err(invalid);
    };

    let mut cursor = Some(0);
    while let Some(offset) = cursor.filter(|&offset| offset <= header) {
      if offset == header {
        return Ok(offset);
      }
      cursor = self.region.read(offset).next();
    }

    warn!("invalid free: {address:p} is not the start of a block");
    Err(invalid)
  }

  fn grant(
    &mut self,
    requested_size: usize,
  ) -> Result<usize> {
    let out_of_memory = HeapError::OutOfMemory {
      requested: requested_size,
    };

    let aligned = align!(requested_size).ok_or(out_of_memory)?;

    let Some(entry) = self.index.extract_fitting(aligned) else {
      warn!("out of memory: no free block of {aligned} bytes");
      return Err(out_of_memory);
    };

    self.split(entry.offset, aligned);

    let mut block = self.region.read(entry.offset);
    block.is_free = false;
    block.requested_size = requested_size;
    self.region.write(entry.offset, block);
    self.region.payload_mut(entry.offset, block.size).fill(0);

    trace!(
      "allocate({requested_size}) -> block at {:#x} with {} bytes",
      entry.offset, block.size
    );

    Ok(entry.offset)
  }

  /// Shrinks the block at `offset` to `size` bytes when the rest is big
  /// enough to stand as a free block of its own.
  fn split(
    &mut self,
    offset: usize,
    size: usize,
  ) {
    let mut block = self.region.read(offset);

    let Some(rest) = block.size.checked_sub(size) else {
      return;
    };
    if rest < MIN_SPLIT_REMAINDER {
      return;
    }

    let remainder_offset = offset + HEADER_SIZE + size;
    let remainder = Block::new(rest - HEADER_SIZE, true, block.next());

    // An unindexed remainder could never be handed out, so keep the block whole.
    if self
      .index
      .insert(FreeEntry {
        offset: remainder_offset,
        size: remainder.size,
      })
      .is_err()
    {
      return;
    }

    self.region.write(remainder_offset, remainder);

    block.size = size;
    block.next = remainder_offset;
    self.region.write(offset, block);

    trace!(
      "split block at {offset:#x}: kept {size} bytes, {} bytes free at {remainder_offset:#x}",
      remainder.size
    );
  }

  fn release(
    &mut self,
    offset: usize,
  ) -> Result<()> {
    let original = self.region.read(offset);
    let mut block = original;

    if block.is_free {
      let addr = self.region.payload_ptr(offset).as_ptr() as usize;
      warn!("invalid free: block at {offset:#x} is already free");
      return Err(HeapError::NotAllocated { addr });
    }

    block.is_free = true;
    block.requested_size = 0;
    self.region.write(offset, block);

    trace!("release block at {offset:#x} with {} bytes", block.size);

    // Without a free neighbour to merge with, a block the index cannot hold
    // would be unreachable, so the release is undone.
    if let Err(err) = self.index.insert(FreeEntry {
      offset,
      size: block.size,
    }) {
      if !self.has_free_neighbour(offset, block) {
        self.region.write(offset, original);
        return Err(err);
      }
    }

    self.coalesce();
    Ok(())
  }

  fn has_free_neighbour(
    &self,
    offset: usize,
    block: Block,
  ) -> bool {
    if block.next().is_some_and(|next| self.region.read(next).is_free) {
      return true;
    }

    let mut cursor = Some(0);
    while let Some(current) = cursor.filter(|&current| current < offset) {
      let header = self.region.read(current);
      if header.next() == Some(offset) {
        return header.is_free;
      }
      cursor = header.next();
    }

    false
  }

  /// Merges every run of physically adjacent free blocks into one block.
  fn coalesce(&mut self) {
    let mut current = 0;

    loop {
      let block = self.region.read(current);
      let Some(next_offset) = block.next() else {
        break;
      };
      let next = self.region.read(next_offset);

      if block.is_free && next.is_free && block.end(current) == next_offset {
        self.index.remove(current);
        self.index.remove(next_offset);

        let merged = Block::new(block.size + HEADER_SIZE + next.size, true, next.next());
        self.region.write(current, merged);

        let _ = self.index.insert(FreeEntry {
          offset: current,
          size: merged.size,
        });

        trace!(
          "merged block at {next_offset:#x} into {current:#x}, now {} bytes",
          merged.size
        );
        continue;
      }

      current = next_offset;
    }
  }

  fn resize(
    &mut self,
    offset: usize,
    new_size: usize,
  ) -> Result<usize> {
    let mut block = self.region.read(offset);

    if block.is_free {
      let addr = self.region.payload_ptr(offset).as_ptr() as usize;
      warn!("invalid resize: block at {offset:#x} is not allocated");
      return Err(HeapError::NotAllocated { addr });
    }

    if block.size >= new_size {
      block.requested_size = new_size;
      self.region.write(offset, block);

      // `block.size` is a multiple of the alignment, so this cannot round past it.
      let aligned = align!(new_size).unwrap_or(block.size);
      self.split(offset, aligned);
      self.coalesce();

      trace!("resize({new_size}) kept block at {offset:#x} in place");
      return Ok(offset);
    }

    let moved = self.grant(new_size)?;
    self.region.copy_payload(offset, moved, block.size.min(new_size));
    if let Err(err) = self.release(offset) {
      warn!("resize: old block at {offset:#x} stays allocated: {err}");
    }

    trace!("resize({new_size}) moved block {offset:#x} -> {moved:#x}");

    Ok(moved)
  }
}

/// Iterator over the blocks of a heap in address order.
pub struct Blocks<'a> {
  region: Option<&'a Region>,
  cursor: Option<usize>,
}

impl Iterator for Blocks<'_> {
  type Item = (usize, Block);

  fn next(&mut self) -> Option<Self::Item> {
    let region = self.region?;
    let offset = self.cursor.filter(|&offset| region.contains_header(offset))?;
    let block = region.read(offset);

    self.cursor = block.next().filter(|&next| next > offset);

    Some((offset, block))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::config::FitPolicy;

  const SMALL: Config = Config::DEFAULT.with_region_size(64 * 1024);

  fn heap() -> Heap<OwnedBuffer> {
    Heap::with_owned_buffer(SMALL)
  }

  fn layout(heap: &Heap<OwnedBuffer>) -> Vec<(usize, bool)> {
    heap.blocks().map(|(_, block)| (block.size, block.is_free)).collect()
  }

  struct Refusing {
    calls: usize,
  }

  impl RegionSource for Refusing {
    fn acquire(
      &mut self,
      _byte_count: isize,
    ) -> Option<NonNull<u8>> {
      self.calls += 1;
      None
    }
  }

  #[test]
  fn test_reservation_is_lazy() {
    let mut heap = heap();
    assert!(!heap.is_reserved());
    assert_eq!(heap.blocks().count(), 0);

    heap.allocate(1).unwrap();

    assert!(heap.is_reserved());
    assert_eq!(heap.region_len(), Some(64 * 1024));
  }

  #[test]
  fn test_zero_size_does_not_reserve() {
    let mut heap = heap();

    assert_eq!(heap.allocate(0), Err(HeapError::ZeroSize));
    assert!(!heap.is_reserved());
  }

  #[test]
  fn test_reservation_failure_is_sticky() {
    let mut heap = Heap::new(Refusing { calls: 0 }, SMALL);

    for _ in 0..3 {
      assert_eq!(
        heap.allocate(16),
        Err(HeapError::RegionUnavailable { size: 64 * 1024 })
      );
    }

    assert_eq!(heap.source.calls, 1);
    assert!(heap.region_start().is_none());
  }

  #[test]
  fn test_region_too_small_for_a_block() {
    let config = Config::DEFAULT.with_region_size(HEADER_SIZE);
    let mut heap = Heap::with_owned_buffer(config);

    assert!(matches!(
      heap.allocate(8),
      Err(HeapError::RegionUnavailable { .. })
    ));
  }

  #[test]
  fn test_allocate_splits_and_aligns() {
    let mut heap = heap();
    heap.allocate(13).unwrap();

    let total = 64 * 1024 - HEADER_SIZE;
    assert_eq!(
      layout(&heap),
      vec![(16, false), (total - 16 - HEADER_SIZE, true)]
    );

    let (_, first) = heap.blocks().next().unwrap();
    assert_eq!(first.requested_size, 13);
  }

  #[test]
  fn test_small_remainder_is_not_split_off() {
    let mut heap = heap();
    let first = heap.allocate(64).unwrap();
    heap.allocate(8).unwrap();
    heap.release(first.as_ptr()).unwrap();

    // 64 free bytes; 40 + header + 16 would be needed to split.
    let reused = heap.allocate(40).unwrap();

    assert_eq!(reused, first);
    assert_eq!(heap.usable_size(reused.as_ptr()), Ok(64));
  }

  #[test]
  fn test_out_of_memory_leaves_heap_unchanged() {
    let mut heap = heap();
    heap.allocate(8).unwrap();
    let before = layout(&heap);

    assert_eq!(
      heap.allocate(64 * 1024),
      Err(HeapError::OutOfMemory { requested: 64 * 1024 })
    );
    assert_eq!(
      heap.allocate(usize::MAX),
      Err(HeapError::OutOfMemory { requested: usize::MAX })
    );
    assert_eq!(layout(&heap), before);
  }

  #[test]
  fn test_release_rejects_foreign_and_interior_pointers() {
    let mut heap = heap();
    let mut outside = [0u8; 8];

    assert!(matches!(
      heap.release(outside.as_mut_ptr()),
      Err(HeapError::InvalidPointer { .. })
    ));

    let block = heap.allocate(64).unwrap();
    let before = layout(&heap);

    assert!(matches!(
      heap.release(outside.as_mut_ptr()),
      Err(HeapError::InvalidPointer { .. })
    ));
    assert!(matches!(
      heap.release(block.as_ptr().wrapping_add(8)),
      Err(HeapError::InvalidPointer { .. })
    ));
    assert_eq!(layout(&heap), before);
  }

  #[test]
  fn test_double_release_is_rejected() {
    let mut heap = heap();
    let first = heap.allocate(32).unwrap();
    let _second = heap.allocate(32).unwrap();

    heap.release(first.as_ptr()).unwrap();
    let indexed = heap.free_index().unwrap().len();

    assert!(matches!(
      heap.release(first.as_ptr()),
      Err(HeapError::NotAllocated { .. })
    ));
    assert_eq!(heap.free_index().unwrap().len(), indexed);
  }

  #[test]
  fn test_usable_size_rejects_released_block() {
    let mut heap = heap();
    let first = heap.allocate(32).unwrap();
    heap.allocate(32).unwrap();
    assert_eq!(heap.usable_size(first.as_ptr()), Ok(32));

    heap.release(first.as_ptr()).unwrap();

    assert_eq!(
      heap.usable_size(first.as_ptr()),
      Err(HeapError::NotAllocated {
        addr: first.as_ptr() as usize
      })
    );
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut heap = heap();
    assert_eq!(heap.release(std::ptr::null_mut()), Ok(()));
    assert!(!heap.is_reserved());
  }

  #[test]
  fn test_resize_shrink_in_place_frees_tail() {
    let mut heap = heap();
    let block = heap.allocate(256).unwrap();
    heap.allocate(8).unwrap();

    let shrunk = heap.resize(block.as_ptr(), 100).unwrap();

    assert_eq!(shrunk, Some(block));
    let (_, header) = heap.blocks().next().unwrap();
    assert_eq!(header.size, 104);
    assert_eq!(header.requested_size, 100);
    assert_eq!(layout(&heap)[1], (256 - 104 - HEADER_SIZE, true));
  }

  #[test]
  fn test_resize_shrink_merges_tail_with_free_neighbour() {
    let mut heap = heap();
    let block = heap.allocate(256).unwrap();

    heap.resize(block.as_ptr(), 8).unwrap();

    let total = 64 * 1024 - HEADER_SIZE;
    assert_eq!(layout(&heap), vec![(8, false), (total - 8 - HEADER_SIZE, true)]);
    assert_eq!(heap.free_index().unwrap().len(), 1);
  }

  #[test]
  fn test_resize_grow_failure_keeps_original() {
    let mut heap = heap();
    let block = heap.allocate(16).unwrap();
    unsafe { block.as_ptr().write(0x5A) };

    assert!(matches!(
      heap.resize(block.as_ptr(), 1 << 20),
      Err(HeapError::OutOfMemory { .. })
    ));
    assert_eq!(unsafe { block.as_ptr().read() }, 0x5A);
    assert_eq!(heap.usable_size(block.as_ptr()), Ok(16));
  }

  #[test]
  fn test_full_index_keeps_shrunk_block_whole() {
    let config = SMALL.with_index_capacity(Some(2));
    let mut heap = Heap::with_owned_buffer(config);

    let a = heap.allocate(256).unwrap();
    heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    heap.release(c.as_ptr()).unwrap();
    assert!(heap.free_index().unwrap().is_full());

    heap.resize(a.as_ptr(), 16).unwrap();

    assert_eq!(heap.usable_size(a.as_ptr()), Ok(256));
  }

  #[test]
  fn test_release_on_full_index_merges_with_free_neighbour() {
    let config = SMALL.with_index_capacity(Some(2));
    let mut heap = Heap::with_owned_buffer(config);

    heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    heap.release(c.as_ptr()).unwrap();

    // The index is full; `b` cannot be indexed on its own but merges with `c`.
    heap.release(b.as_ptr()).unwrap();

    let index = heap.free_index().unwrap();
    let b_offset = HEADER_SIZE + 16;
    assert_eq!(index.len(), 2);
    assert!(index.iter().any(|entry| *entry == FreeEntry {
      offset: b_offset,
      size: 16 + HEADER_SIZE + 16,
    }));
    assert!(matches!(
      heap.usable_size(b.as_ptr()),
      Err(HeapError::NotAllocated { .. })
    ));
  }

  #[test]
  fn test_release_reports_full_index_and_keeps_block() {
    let config = SMALL.with_index_capacity(Some(2));
    let mut heap = Heap::with_owned_buffer(config);

    let a = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    heap.release(c.as_ptr()).unwrap();
    let before = heap.heap_report();

    // `a` has no free neighbour to merge with, so it cannot be indexed.
    assert_eq!(
      heap.release(a.as_ptr()),
      Err(HeapError::IndexFull { capacity: 2 })
    );

    assert_eq!(heap.heap_report(), before);
    assert_eq!(heap.usable_size(a.as_ptr()), Ok(16));
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_grow_keeps_old_block_when_index_is_full() {
    let config = SMALL.with_index_capacity(Some(2));
    let mut heap = Heap::with_owned_buffer(config);

    let a = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    heap.release(c.as_ptr()).unwrap();
    unsafe { a.as_ptr().write(0x7E) };

    let grown = heap.resize(a.as_ptr(), 64).unwrap().unwrap();

    assert_eq!(unsafe { grown.as_ptr().read() }, 0x7E);
    assert_eq!(heap.usable_size(a.as_ptr()), Ok(16));
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_best_fit_policy_through_heap() {
    let config = SMALL.with_fit_policy(FitPolicy::BestFit);
    let mut heap = Heap::with_owned_buffer(config);

    let mut blocks = Vec::new();
    for size in [512, 8, 128, 8, 96, 8] {
      blocks.push(heap.allocate(size).unwrap());
    }
    for &i in &[0, 2, 4] {
      heap.release(blocks[i].as_ptr()).unwrap();
    }

    assert_eq!(heap.allocate(90).unwrap(), blocks[4]);
  }
}
