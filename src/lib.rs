//! # rheapkeep - A Fixed-Region Heap Allocator
//!
//! This crate provides `malloc`/`free`/`realloc`-style allocation over a
//! **single region** of memory that is reserved once, on first use, and then
//! carved into blocks for the life of the heap.
//!
//! ## Overview
//!
//! ```text
//!   Managed Region (reserved once, never grown):
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ ┌───┬──────┐ ┌───┬────┐ ┌───┬──────────┐ ┌───┬─────────────────────┐ │
//!   │ │ H │ used │ │ H │free│ │ H │   used   │ │ H │        free         │ │
//!   │ └───┴──────┘ └───┴────┘ └───┴──────────┘ └───┴─────────────────────┘ │
//!   │   │            ▲ │        ▲ │              ▲                         │
//!   │   └── next ────┘ └─ next ─┘ └──── next ────┘                         │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free-Space Index (min-heap by size):     [ free(16) | free(4000) ]
//! ```
//!
//! Every block starts with a header (`H`) followed by its payload. Headers
//! link to the next block by address, so the blocks partition the region
//! exactly. Free blocks are additionally tracked by a size-ordered index.
//!
//! ## Crate Structure
//!
//! ```text
//!   rheapkeep
//!   ├── align        - align! macro (8-byte granularity)
//!   ├── block        - Block header layout and offset translation
//!   ├── config       - Config, FitPolicy and defaults
//!   ├── diagnostics  - Heap/index reports and invariant checks
//!   ├── error        - HeapError
//!   ├── heap         - Heap: allocate, release, resize, split, coalesce
//!   ├── index        - FreeIndex min-heap
//!   ├── region       - Bounds-checked access to the managed region
//!   └── source       - RegionSource, Sbrk and OwnedBuffer
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheapkeep::{Config, Heap};
//!
//! let mut heap = Heap::with_owned_buffer(Config::default());
//!
//! let ptr = heap.allocate(64).unwrap().as_ptr() as *mut u64;
//! unsafe {
//!   assert_eq!(*ptr, 0);
//!   *ptr = 42;
//! }
//!
//! let ptr = heap.resize(ptr as *mut u8, 256).unwrap().unwrap();
//! assert_eq!(unsafe { *(ptr.as_ptr() as *const u64) }, 42);
//!
//! heap.release(ptr.as_ptr()).unwrap();
//! assert_eq!(heap.free_index().unwrap().len(), 1);
//! ```
//!
//! ## How It Works
//!
//! Allocation rounds the request up to 8 bytes and asks the index for a free
//! block that fits. Oversized blocks are split:
//!
//! ```text
//!   Before:  ┌───┬────────────────────────────────────┐
//!            │ H │              free (N)              │
//!            └───┴────────────────────────────────────┘
//!
//!   After:   ┌───┬──────────┬───┬─────────────────────┐
//!            │ H │ used (S) │ H │ free (N - S - H)    │
//!            └───┴──────────┴───┴─────────────────────┘
//!                 ▲
//!                 └── pointer returned to the caller (zeroed)
//! ```
//!
//! A split only happens when the remainder can hold a header plus 16 bytes.
//! Releasing a block indexes it and then merges every pair of adjacent free
//! blocks, so freeing neighbours restores one large block.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `Heap` has no internal locking
//! - **Fixed size**: running out of the region is an allocation failure
//! - **8-byte alignment**: payloads are aligned to 8 bytes, no more
//! - **Unix-only** for [`Sbrk`]: it requires `libc` and `sbrk(2)`

pub mod align;
mod block;
mod config;
mod diagnostics;
mod error;
mod heap;
mod index;
mod region;
mod source;

pub use block::{Block, HEADER_SIZE, MIN_SPLIT_REMAINDER};
pub use config::{Config, DEFAULT_REGION_SIZE, FitPolicy, MAX_FREE_BLOCKS};
pub use diagnostics::{BlockInfo, HeapReport, IndexReport, InvariantViolation};
pub use error::{HeapError, Result};
pub use heap::{Blocks, Heap};
pub use index::{FreeEntry, FreeIndex, HeapOrderViolation};
pub use source::{OwnedBuffer, RegionSource, Sbrk};
