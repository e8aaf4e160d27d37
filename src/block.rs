//! # Block Layout
//!
//! Every block in the heap is delimited by a pair of boundary tags, one
//! word each, with identical contents:
//!
//! ```text
//!         63                                    4  3    1  0
//!        ┌───────────────────────────────────────┬──────┬───┐
//!        │            block size in bytes        │  000 │ a │
//!        └───────────────────────────────────────┴──────┴───┘
//!                                                          │
//!                      a = 1: allocated, a = 0: free ──────┘
//! ```
//!
//! The size is always a multiple of 16, so the low four bits are spare and
//! bit 0 carries the allocation flag. The footer of a block and the header
//! of its successor are adjacent words:
//!
//! ```text
//!   ┌────────┬──────────────────────────┬────────┬────────┬─────────
//!   │ header │         payload          │ footer │ header │ payload
//!   ├────────┼──────────────────────────┼────────┼────────┼─────────
//!   │ size|a │                          │ size|a │ size|a │
//!   └────────┴──────────────────────────┴────────┴────────┴─────────
//!   ▲        ▲                                   ▲
//!   │        │                                   │
//!   │    payload pointer (16-byte aligned)    next block
//!   block start
//! ```
//!
//! This module owns every address computation on that layout. The rest of
//! the crate addresses blocks only through payload pointers and the
//! helpers below.

use std::mem;

use static_assertions::const_assert;

/// Word size in bytes; also the size of a header or a footer.
pub const WSIZE: usize = 8;

/// Double word size in bytes; payload alignment and size granularity.
pub const DSIZE: usize = 16;

/// Smallest legal block: header, two free-list link words, footer.
pub const MIN_BLOCK: usize = 32;

const ALLOC_BIT: usize = 0x1;
const SIZE_MASK: usize = !0xF;

// The tag format stores a 64-bit word per tag.
const_assert!(mem::size_of::<usize>() == WSIZE);
const_assert!(MIN_BLOCK == DSIZE + 2 * WSIZE);

/// Packs a block size and an allocation flag into a tag word.
///
/// The size must already be rounded to a double word; the low four bits
/// must be clear so the flag has somewhere to live.
pub fn pack(
  size: usize,
  allocated: bool,
) -> usize {
  debug_assert_eq!(size & !SIZE_MASK, 0, "tag size must be 16-byte aligned");

  size | usize::from(allocated)
}

/// Extracts the block size from a tag word.
pub fn size_of_word(word: usize) -> usize {
  word & SIZE_MASK
}

/// Extracts the allocation flag from a tag word.
pub fn is_allocated(word: usize) -> bool {
  word & ALLOC_BIT != 0
}

/// Reads one tag word at the given address.
///
/// # Safety
///
/// `addr` must point to a readable, word-aligned word inside the heap.
pub unsafe fn get(addr: *const u8) -> usize {
  unsafe { addr.cast::<usize>().read() }
}

/// Writes one tag word at the given address.
///
/// # Safety
///
/// `addr` must point to a writable, word-aligned word inside the heap.
pub unsafe fn put(
  addr: *mut u8,
  word: usize,
) {
  unsafe { addr.cast::<usize>().write(word) }
}

/// Address of the header, given the payload pointer.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block inside the heap.
pub unsafe fn header_of(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(WSIZE) }
}

/// Address of the footer, given the payload pointer.
///
/// Computed from the size currently stored in the header, so the header
/// must be written before the footer is addressed.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block whose header holds a valid
/// size.
pub unsafe fn footer_of(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(size_at(bp)).sub(DSIZE) }
}

/// Payload pointer of the block owning the given header.
///
/// # Safety
///
/// `header` must point to a block header inside the heap.
pub unsafe fn payload_of(header: *mut u8) -> *mut u8 {
  unsafe { header.add(WSIZE) }
}

/// Payload pointer of the block that follows `bp` in address order.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block whose header holds a valid
/// size, and a successor block (or the epilogue) must exist.
pub unsafe fn next_of(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(size_at(bp)) }
}

/// Payload pointer of the block that precedes `bp` in address order.
///
/// Reads the predecessor's footer, which sits one double word before the
/// payload.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block with a predecessor block
/// (or the prologue footer) in front of it.
pub unsafe fn prev_of(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(size_of_word(get(bp.sub(DSIZE)))) }
}

/// Size of the block owning the given payload pointer, per its header.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block inside the heap.
pub unsafe fn size_at(bp: *mut u8) -> usize {
  unsafe { size_of_word(get(header_of(bp))) }
}

/// Allocation flag of the block owning the given payload pointer.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block inside the heap.
pub unsafe fn allocated_at(bp: *mut u8) -> bool {
  unsafe { is_allocated(get(header_of(bp))) }
}

/// Writes both boundary tags of the block at `bp`.
///
/// # Safety
///
/// `bp` must be the payload pointer of a block with room for `size` bytes
/// inside the heap.
pub unsafe fn set_tags(
  bp: *mut u8,
  size: usize,
  allocated: bool,
) {
  unsafe {
    put(header_of(bp), pack(size, allocated));
    put(footer_of(bp), pack(size, allocated));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_and_extract() {
    for size in (0..4096).step_by(DSIZE) {
      for allocated in [false, true] {
        let word = pack(size, allocated);

        assert_eq!(size, size_of_word(word));
        assert_eq!(allocated, is_allocated(word));
      }
    }
  }

  #[test]
  fn pack_keeps_reserved_bits_clear() {
    let word = pack(0x40, false);

    assert_eq!(word & 0xE, 0);
  }

  #[test]
  fn arithmetic_over_two_fake_blocks() {
    // A word-aligned scratch area standing in for a slice of the heap:
    // [ hdr 48 | payload 32 | ftr 48 | hdr 32 | payload 16 | ftr 32 ]
    let mut words = [0usize; 10];
    let base = words.as_mut_ptr().cast::<u8>();

    unsafe {
      let first = payload_of(base);
      put(header_of(first), pack(48, true));
      put(footer_of(first), pack(48, true));

      let second = next_of(first);
      assert_eq!(second, first.add(48));

      set_tags(second, 32, false);

      assert_eq!(size_at(first), 48);
      assert!(allocated_at(first));
      assert_eq!(size_at(second), 32);
      assert!(!allocated_at(second));

      assert_eq!(prev_of(second), first);
      assert_eq!(footer_of(second), second.add(32).sub(DSIZE));
      assert_eq!(get(header_of(second)), get(footer_of(second)));
    }
  }
}
