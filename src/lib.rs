//! # tagalloc - A Boundary-Tag Memory Allocator Library
//!
//! This crate provides a general-purpose **explicit-free-list allocator**
//! over a single contiguous, monotonically growable heap region. Freed
//! payloads are reused for later requests, neighbouring free blocks merge
//! immediately, and oversized blocks are split on allocation.
//!
//! ## Overview
//!
//! ```text
//!   Heap managed by the allocator:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           HEAP MEMORY                                │
//!   │                                                                      │
//!   │  ┌──┬────────┬────────────┬────────┬──────────────────┬────────┬──┐  │
//!   │  │PF│ alloc  │    free    │ alloc  │       free       │ alloc  │EH│  │
//!   │  └──┴────────┴────────────┴────────┴──────────────────┴────────┴──┘  │
//!   │            ▲   │      ▲                  │   ▲                       │
//!   │            │   │      │                  │   │                       │
//!   │       boundary │      └── free list ─────┘   │                       │
//!   │       tags on  └─────────────────────────────┘                       │
//!   │       every block      (threaded through the free payloads)          │
//!   │                                                                      │
//!   │  PF = prologue footer, EH = epilogue header (permanent sentinels)    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: first fit over the free list, split the residue.
//!   Release:    merge with free neighbours in O(1), LIFO reinsert.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary-tag words and block address arithmetic (internal)
//!   ├── free_list  - Doubly-linked list through free payloads (internal)
//!   ├── heap       - HeapSource trait, SbrkSource, FixedSource
//!   └── explicit   - ExplicitAllocator implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{ExplicitAllocator, FixedSource};
//!
//! let source = FixedSource::with_capacity(64 * 1024);
//! let mut allocator = ExplicitAllocator::bootstrap(source).unwrap();
//!
//! let ptr = allocator.allocate(100);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     // The payload is ours for 100 bytes.
//!     ptr.write_bytes(0x42, 100);
//! }
//!
//! allocator.release(ptr);
//! assert!(allocator.check());
//! ```
//!
//! To manage the program break instead, bootstrap with
//! [`SbrkSource`]:
//!
//! ```rust,ignore
//! let mut allocator = ExplicitAllocator::bootstrap(SbrkSource::new())?;
//! ```
//!
//! ## Features
//!
//! - **Explicit free list**: freed blocks are found in O(free blocks),
//!   not O(heap blocks)
//! - **Immediate coalescing**: no two adjacent free blocks ever exist
//! - **Pluggable backing store**: `sbrk` or an owned buffer, behind one
//!   trait
//! - **Consistency checker**: `check()` verifies the whole heap structure
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **First fit only**: no best-fit or segregated size classes
//! - **The heap never shrinks**: released memory is recycled, not
//!   returned to the source
//!
//! ## Safety
//!
//! The allocator hands out raw pointers and trusts the caller to release
//! each of them exactly once. Inside the crate, all pointer arithmetic on
//! the block format is confined to the `block` module; the public API is
//! safe to call.

pub mod align;
mod block;
mod explicit;
mod free_list;
pub mod heap;

pub use block::{DSIZE, MIN_BLOCK, WSIZE};
pub use explicit::{CHUNKSIZE, ExplicitAllocator, HeapError};
pub use heap::{FixedSource, HeapSource, SbrkSource};
