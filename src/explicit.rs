//! # Explicit-List Allocator
//!
//! A general-purpose allocator over a single growable heap region. Blocks
//! carry boundary tags (a header word mirrored by a footer word), freed
//! blocks thread a doubly-linked list through their payload bytes, and
//! neighbouring free blocks merge the moment one of them is released.
//!
//! ## Heap Layout
//!
//! ```text
//!    lo                                                            hi
//!    │                                                              │
//!    ▼                                                              ▼
//!   ┌──────────┬──────────┬─────────────────────────────┬──────────┐
//!   │ prologue │ epilogue │                             │ epilogue │
//!   │  footer  │→ becomes │   real blocks, back to back │  header  │
//!   │ (0|1)    │ 1st hdr  │                             │ (0|1)    │
//!   └──────────┴──────────┴─────────────────────────────┴──────────┘
//!        8 bytes    8 bytes                                  8 bytes
//! ```
//!
//! The two sentinels read as zero-size allocated blocks, so neighbour
//! inspection during coalescing never runs off either end of the heap.
//! Extending the heap overwrites the old epilogue with the new block's
//! header and writes a fresh epilogue at the new top.
//!
//! ## Allocation
//!
//! ```text
//!   allocate(n)
//!      │
//!      ├── n == 0 ───────────────────────────────► null
//!      │
//!      ├── normalise: asize = header + footer + n, rounded to 16,
//!      │              at least one minimum block (32 bytes)
//!      │
//!      ├── first fit over the free list ── miss ──► extend the heap,
//!      │        │                                   retry once
//!      │        ▼
//!      ├── unlink the block, re-tag it allocated
//!      │
//!      ├── split off the residue if it can stand
//!      │   on its own (≥ 32 bytes)
//!      │
//!      └──────────────────────────────────────────► payload pointer
//! ```
//!
//! ## Release
//!
//! Releasing derives the header from the payload pointer, clears the
//! allocation flag in both tags and merges with whichever neighbours are
//! free. Boundary tags make all four cases O(1):
//!
//! ```text
//!   prev      next      survivor
//!   ─────────────────────────────────────────────
//!   in use    in use    the block itself
//!   in use    free      block + next
//!   free      in use    prev + block
//!   free      free      prev + block + next
//! ```
//!
//! The survivor is prepended to the free list, so the list stays LIFO.

use std::ptr;

use thiserror::Error;
use tracing::{debug, error, instrument, trace};

use crate::align;
use crate::block::{
  DSIZE, MIN_BLOCK, WSIZE, allocated_at, footer_of, get, header_of, is_allocated, next_of, pack,
  payload_of, prev_of, put, set_tags, size_at,
};
use crate::free_list::FreeList;
use crate::heap::HeapSource;

/// Granularity of heap extension: a miss on the free list grows the heap
/// by at least this many bytes.
pub const CHUNKSIZE: usize = 4096;

/// Raised when the heap source cannot provide the bytes the allocator
/// needs to get off the ground.
#[derive(Debug, Error)]
pub enum HeapError {
  #[error("heap source refused to grow by {0} bytes")]
  Exhausted(usize),
}

/// A boundary-tag allocator with an explicit, LIFO, first-fit free list.
///
/// The allocator owns its heap source; all block metadata lives inside
/// the heap bytes themselves. None of the operations block or allocate
/// through any other allocator.
///
/// # Thread Safety
///
/// Not thread-safe. The allocator holds raw pointers into its region and
/// must be driven from a single thread.
pub struct ExplicitAllocator<S: HeapSource> {
  source: S,

  /// Free blocks, most recently released first.
  free: FreeList,

  /// Payload pointer of the lowest real block; the implicit-list cursor
  /// used by the checker and the heap dump.
  first: *mut u8,
}

impl<S: HeapSource> ExplicitAllocator<S> {
  /// Builds an allocator over the given source and seeds it with one
  /// [`CHUNKSIZE`] free block.
  ///
  /// The bootstrap requests 16 bytes for the two sentinels, then extends
  /// the heap once:
  ///
  /// ```text
  ///   after bootstrap:
  ///
  ///   ┌──────────┬──────────┬───────────────────────────┬──────────┐
  ///   │ prologue │ header   │       4096-byte free      │ epilogue │
  ///   │  footer  │ (4096|0) │       payload + links     │  header  │
  ///   └──────────┴──────────┴───────────────────────────┴──────────┘
  ///                         ▲
  ///                         └── free-list head
  /// ```
  pub fn bootstrap(mut source: S) -> Result<Self, HeapError> {
    let base = source
      .extend(DSIZE)
      .ok_or(HeapError::Exhausted(DSIZE))?
      .as_ptr();

    debug_assert_eq!(base as usize % DSIZE, 0, "heap base must be double-word aligned");

    unsafe {
      put(base, pack(0, true));
      put(base.add(WSIZE), pack(0, true));
    }

    // The first real block's header will overwrite the epilogue word.
    let mut allocator = Self {
      source,
      free: FreeList::new(),
      first: unsafe { payload_of(base.add(WSIZE)) },
    };

    if unsafe { allocator.extend_heap(CHUNKSIZE) }.is_none() {
      return Err(HeapError::Exhausted(CHUNKSIZE));
    }

    debug!(lo = ?allocator.source.lo(), hi = ?allocator.source.hi(), "allocator bootstrapped");

    Ok(allocator)
  }

  /// Allocates `size` payload bytes and returns a 16-byte-aligned pointer
  /// to them, or null when the request is zero or the heap source is
  /// exhausted.
  ///
  /// A failed allocation leaves the heap untouched.
  #[instrument(level = "trace", skip(self))]
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 || size > usize::MAX - 2 * DSIZE {
      return ptr::null_mut();
    }

    // Reserve one word each for header and footer, keep the block a
    // multiple of 16 and never below the minimum block.
    let asize = if size <= DSIZE {
      MIN_BLOCK
    } else {
      align!(size + DSIZE)
    };

    unsafe {
      let mut bp = self.find_fit(asize);

      if bp.is_null() {
        let request = asize.max(CHUNKSIZE);
        if self.extend_heap(request).is_none() {
          error!(size, request, "allocation failed, heap source exhausted");
          return ptr::null_mut();
        }

        bp = self.find_fit(asize);
        if bp.is_null() {
          return ptr::null_mut();
        }
      }

      self.free.remove(bp);
      set_tags(bp, size_at(bp), true);
      self.split(bp, asize);

      debug!(?bp, size, block = size_at(bp), "allocated");

      bp
    }
  }

  /// Returns a payload to the allocator.
  ///
  /// Null is ignored. Passing a pointer that did not come out of
  /// [`allocate`](Self::allocate) on this allocator, or passing the same
  /// pointer twice, is undefined behaviour.
  #[instrument(level = "trace", skip(self))]
  pub fn release(
    &mut self,
    payload: *mut u8,
  ) {
    if payload.is_null() {
      return;
    }

    unsafe {
      set_tags(payload, size_at(payload), false);
      let survivor = self.coalesce(payload);

      debug!(?payload, merged_into = ?survivor, size = size_at(survivor), "released");
    }
  }

  /// Resizes an allocation, moving it if the current block is too small.
  ///
  /// A null `payload` allocates, a zero `new_size` releases and returns
  /// null. When the block already holds `new_size` payload bytes the
  /// pointer comes back unchanged; otherwise the contents move to a fresh
  /// block and the old one is released. On failure null is returned and
  /// the old allocation stays valid.
  #[instrument(level = "trace", skip(self))]
  pub fn reallocate(
    &mut self,
    payload: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    if payload.is_null() {
      return self.allocate(new_size);
    }

    if new_size == 0 {
      self.release(payload);
      return ptr::null_mut();
    }

    unsafe {
      let old_payload_size = size_at(payload) - DSIZE;

      if old_payload_size >= new_size {
        return payload;
      }

      let fresh = self.allocate(new_size);
      if fresh.is_null() {
        return ptr::null_mut();
      }

      ptr::copy_nonoverlapping(payload, fresh, old_payload_size);
      self.release(payload);

      fresh
    }
  }

  /// First-fit scan over the free list in list order.
  ///
  /// # Safety
  ///
  /// The free list must be consistent.
  unsafe fn find_fit(
    &self,
    asize: usize,
  ) -> *mut u8 {
    unsafe {
      let mut bp = self.free.head();

      while !bp.is_null() {
        if size_at(bp) >= asize {
          trace!(?bp, block = size_at(bp), asize, "fit found");
          return bp;
        }
        bp = FreeList::next(bp);
      }

      ptr::null_mut()
    }
  }

  /// Carves an allocated block down to `asize` bytes, turning the residue
  /// into a free block of its own.
  ///
  /// ```text
  ///   before:  ┌──────────────── bsize, allocated ────────────────┐
  ///   after:   ┌── asize, allocated ──┬── bsize - asize, free ────┐
  /// ```
  ///
  /// Residues below the minimum block stay inside the allocation as
  /// padding. The residue is run through [`coalesce`](Self::coalesce),
  /// which also links it into the free list.
  ///
  /// # Safety
  ///
  /// `bp` must be an allocated block of at least `asize` bytes that is
  /// not on the free list.
  unsafe fn split(
    &mut self,
    bp: *mut u8,
    asize: usize,
  ) {
    unsafe {
      let bsize = size_at(bp);

      if bsize - asize >= MIN_BLOCK {
        set_tags(bp, asize, true);

        let residue = next_of(bp);
        set_tags(residue, bsize - asize, false);

        trace!(?bp, asize, residue = bsize - asize, "split");

        self.coalesce(residue);
      }
    }
  }

  /// Merges the free block at `bp` with any free neighbours, inserts the
  /// survivor at the head of the free list and returns it.
  ///
  /// The sentinels read as allocated, so the neighbour probes need no
  /// bounds checks.
  ///
  /// # Safety
  ///
  /// `bp` must be a free block that is not currently on the free list.
  unsafe fn coalesce(
    &mut self,
    bp: *mut u8,
  ) -> *mut u8 {
    unsafe {
      // Footer of the previous block sits one word before our header.
      let prev_free = !is_allocated(get(header_of(bp).sub(WSIZE)));
      let next = next_of(bp);
      let next_free = !allocated_at(next);

      let survivor = match (prev_free, next_free) {
        (false, false) => bp,

        (false, true) => {
          self.free.remove(next);
          set_tags(bp, size_at(bp) + size_at(next), false);
          bp
        }

        (true, false) => {
          let prev = prev_of(bp);
          self.free.remove(prev);
          set_tags(prev, size_at(prev) + size_at(bp), false);
          prev
        }

        (true, true) => {
          let prev = prev_of(bp);
          self.free.remove(prev);
          self.free.remove(next);
          set_tags(prev, size_at(prev) + size_at(bp) + size_at(next), false);
          prev
        }
      };

      self.free.insert(survivor);

      survivor
    }
  }

  /// Grows the heap by at least `n` bytes and shapes the new bytes into a
  /// free block.
  ///
  /// The old epilogue word becomes the new block's header, and a fresh
  /// epilogue is written at the new top. The new block is coalesced so a
  /// free block that ended at the old top keeps growing seamlessly.
  ///
  /// # Safety
  ///
  /// The sentinels must be in place.
  unsafe fn extend_heap(
    &mut self,
    n: usize,
  ) -> Option<*mut u8> {
    let size = align!(n);
    let bp = self.source.extend(size)?.as_ptr();

    unsafe {
      set_tags(bp, size, false);
      put(header_of(next_of(bp)), pack(0, true));

      trace!(?bp, size, "heap extended");

      Some(self.coalesce(bp))
    }
  }

  /// Total bytes currently held by free blocks.
  pub fn free_bytes(&self) -> usize {
    unsafe {
      let mut total = 0;
      let mut bp = self.free.head();

      while !bp.is_null() {
        total += size_at(bp);
        bp = FreeList::next(bp);
      }

      total
    }
  }

  /// Number of blocks on the free list.
  pub fn free_blocks(&self) -> usize {
    unsafe { self.free.len() }
  }

  /// Total size of the heap region, sentinels included.
  pub fn heap_size(&self) -> usize {
    self.source.hi() as usize - self.source.lo() as usize + 1
  }

  /// Verifies the structural invariants of the heap.
  ///
  /// One pass walks the implicit block list, one pass walks the free
  /// list:
  ///
  /// * header equals footer for every real block,
  /// * every block lies inside the heap bounds,
  /// * payloads are 16-byte aligned and blocks are at least 32 bytes,
  /// * no two adjacent blocks are both free,
  /// * both sentinels still read as zero-size allocated words,
  /// * every free block sits on the free list exactly once, nothing
  ///   allocated does, and the prev/next links agree.
  ///
  /// Returns false on the first violation, logging what broke.
  pub fn check(&self) -> bool {
    unsafe {
      let lo = self.source.lo() as usize;
      let hi = self.source.hi() as usize;

      if get(self.source.lo()) != pack(0, true) {
        error!("prologue footer corrupted");
        return false;
      }

      let mut free_blocks = 0;
      let mut prev_was_free = false;
      let mut bp = self.first;

      while size_at(bp) > 0 {
        let size = size_at(bp);
        let start = header_of(bp) as usize;
        let end = start + size - 1;

        if start < lo || end > hi {
          error!(?bp, size, "block escapes the heap bounds");
          return false;
        }
        if bp as usize % DSIZE != 0 || size % DSIZE != 0 || size < MIN_BLOCK {
          error!(?bp, size, "block violates the size or alignment rules");
          return false;
        }
        if get(header_of(bp)) != get(footer_of(bp)) {
          error!(?bp, "header and footer disagree");
          return false;
        }

        if allocated_at(bp) {
          prev_was_free = false;
        } else {
          if prev_was_free {
            error!(?bp, "two adjacent free blocks");
            return false;
          }
          if !self.free.contains(bp) {
            error!(?bp, "free block missing from the free list");
            return false;
          }
          free_blocks += 1;
          prev_was_free = true;
        }

        bp = next_of(bp);
      }

      if get(header_of(bp)) != pack(0, true) {
        error!("epilogue header corrupted");
        return false;
      }

      let mut listed = 0;
      let mut node = self.free.head();

      if !node.is_null() && !FreeList::prev(node).is_null() {
        error!(?node, "head of the free list has a predecessor");
        return false;
      }

      while !node.is_null() {
        if allocated_at(node) {
          error!(?node, "allocated block on the free list");
          return false;
        }
        if (node as usize) < lo || (node as usize) > hi {
          error!(?node, "free-list node outside the heap");
          return false;
        }

        let next = FreeList::next(node);
        if !next.is_null() && FreeList::prev(next) != node {
          error!(?node, "prev/next links disagree");
          return false;
        }

        listed += 1;
        if listed > free_blocks {
          error!("free list holds more nodes than there are free blocks");
          return false;
        }

        node = next;
      }

      if listed != free_blocks {
        error!(listed, free_blocks, "free-list membership mismatch");
        return false;
      }

      true
    }
  }

  /// Prints one line per block, then the free list, to stdout.
  pub fn dump_heap(&self) {
    unsafe {
      println!(
        "heap [{:?}, {:?}], {} bytes, {} free in {} block(s)",
        self.source.lo(),
        self.source.hi(),
        self.heap_size(),
        self.free_bytes(),
        self.free_blocks(),
      );

      let mut bp = self.first;
      while size_at(bp) > 0 {
        println!(
          "  {:?}  {:>8} bytes  {}",
          header_of(bp),
          size_at(bp),
          if allocated_at(bp) { "allocated" } else { "free" },
        );
        bp = next_of(bp);
      }
      println!("  {:?}  epilogue", header_of(bp));

      print!("  free list:");
      let mut node = self.free.head();
      while !node.is_null() {
        print!(" {node:?}");
        node = FreeList::next(node);
      }
      println!();
    }
  }
}
