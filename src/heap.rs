//! # Heap Sources
//!
//! The allocator never talks to the operating system directly. It grows
//! its heap through the [`HeapSource`] trait, which models a single
//! contiguous region that only ever extends upward:
//!
//! ```text
//!            lo()                                  hi()
//!             │                                     │
//!             ▼                                     ▼
//!   ┌─────────────────────────────────────────────┬──────────────┐
//!   │              mapped heap bytes              │  new bytes   │
//!   └─────────────────────────────────────────────┴──────────────┘
//!                                                 ▲
//!                                                 │
//!                       extend(n) returns the prior top ──┘
//! ```
//!
//! Two sources are provided:
//!
//! * [`SbrkSource`] moves the program break with `sbrk(2)`, the classic
//!   backing store for a userspace allocator.
//! * [`FixedSource`] carves bytes out of an owned, 16-byte-aligned buffer.
//!   Its capacity is exact, which makes exhaustion and growth behaviour
//!   reproducible in tests and demos.

use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};
use tracing::debug;

use crate::{DSIZE, align, align_to};

/// A monotonically growable, contiguous heap region.
///
/// Implementations hand out raw bytes; they know nothing about blocks,
/// tags or free lists.
pub trait HeapSource {
  /// Grows the region by `n` bytes and returns the prior top, the address
  /// where the new bytes begin. Returns `None` when the region cannot
  /// grow further; in that case the region is unchanged.
  ///
  /// `n` is always a multiple of 16.
  fn extend(
    &mut self,
    n: usize,
  ) -> Option<NonNull<u8>>;

  /// Lowest mapped address of the region.
  fn lo(&self) -> *mut u8;

  /// Highest mapped address of the region (inclusive).
  ///
  /// Only meaningful once `extend` has succeeded at least once.
  fn hi(&self) -> *mut u8;
}

/// Grows the heap by moving the program break.
///
/// The first extension rounds the break up to a double word so that every
/// address handed out afterwards keeps the 16-byte payload alignment.
pub struct SbrkSource {
  /// First byte of the region, fixed after the initial extension.
  lo: *mut u8,

  /// One past the last mapped byte.
  top: *mut u8,
}

impl SbrkSource {
  pub fn new() -> Self {
    Self {
      lo: ptr::null_mut(),
      top: ptr::null_mut(),
    }
  }
}

impl HeapSource for SbrkSource {
  fn extend(
    &mut self,
    n: usize,
  ) -> Option<NonNull<u8>> {
    unsafe {
      if self.lo.is_null() {
        let brk = sbrk(0);
        if brk == usize::MAX as *mut c_void {
          return None;
        }

        // Round the break up to a double word before the first extension.
        let pad = align_to!(brk as usize, DSIZE) - brk as usize;
        if pad != 0 && sbrk(pad as intptr_t) == usize::MAX as *mut c_void {
          return None;
        }

        self.lo = (brk as usize + pad) as *mut u8;
        self.top = self.lo;
      }

      // sbrk returns (void*)-1 on failure, otherwise the old break.
      if sbrk(n as intptr_t) == usize::MAX as *mut c_void {
        return None;
      }

      let prior = self.top;
      self.top = self.top.add(n);

      debug!(?prior, grown_by = n, "program break moved");

      NonNull::new(prior)
    }
  }

  fn lo(&self) -> *mut u8 {
    self.lo
  }

  fn hi(&self) -> *mut u8 {
    self.top.wrapping_sub(1)
  }
}

/// Backing storage cell; keeps the buffer base on a double-word boundary.
#[repr(align(16))]
#[derive(Clone, Copy)]
struct Cell([u8; DSIZE]);

/// A heap region carved out of an owned buffer of fixed capacity.
pub struct FixedSource {
  cells: Box<[Cell]>,
  base: *mut u8,
  used: usize,
}

impl FixedSource {
  /// Creates a source holding `bytes` of backing storage, rounded up to a
  /// double word.
  pub fn with_capacity(bytes: usize) -> Self {
    let mut cells = vec![Cell([0; DSIZE]); align!(bytes) / DSIZE].into_boxed_slice();
    let base = cells.as_mut_ptr().cast::<u8>();

    Self { cells, base, used: 0 }
  }

  /// Total number of bytes this source can ever hand out.
  pub fn capacity(&self) -> usize {
    self.cells.len() * DSIZE
  }
}

impl HeapSource for FixedSource {
  fn extend(
    &mut self,
    n: usize,
  ) -> Option<NonNull<u8>> {
    if n > self.capacity() - self.used {
      debug!(requested = n, remaining = self.capacity() - self.used, "fixed source exhausted");
      return None;
    }

    let prior = unsafe { self.base.add(self.used) };
    self.used += n;

    NonNull::new(prior)
  }

  fn lo(&self) -> *mut u8 {
    self.base
  }

  fn hi(&self) -> *mut u8 {
    self.base.wrapping_add(self.used).wrapping_sub(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_source_hands_out_consecutive_ranges() {
    let mut source = FixedSource::with_capacity(256);

    let first = source.extend(64).unwrap().as_ptr();
    let second = source.extend(32).unwrap().as_ptr();

    assert_eq!(first, source.lo());
    assert_eq!(second, unsafe { first.add(64) });
    assert_eq!(source.hi(), unsafe { first.add(96).sub(1) });
  }

  #[test]
  fn fixed_source_base_is_double_word_aligned() {
    let source = FixedSource::with_capacity(64);

    assert_eq!(source.lo() as usize % DSIZE, 0);
  }

  #[test]
  fn fixed_source_refuses_overflow_and_stays_usable() {
    let mut source = FixedSource::with_capacity(64);

    assert!(source.extend(80).is_none());
    assert!(source.extend(64).is_some());
    assert!(source.extend(16).is_none());
  }

  #[test]
  fn fixed_source_rounds_capacity_up() {
    let source = FixedSource::with_capacity(17);

    assert_eq!(source.capacity(), 32);
  }

  #[test]
  fn sbrk_source_extends_the_program_break() {
    let mut source = SbrkSource::new();

    let prior = source.extend(64).unwrap().as_ptr();

    assert_eq!(prior as usize % DSIZE, 0);
    assert_eq!(prior, source.lo());
    assert_eq!(source.hi(), unsafe { prior.add(64).sub(1) });
  }
}
