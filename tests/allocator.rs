//! End-to-end scenarios driven through the public surface only, with a
//! fixed-capacity source so every size and address is reproducible.

use rand::Rng;
use tagalloc::{CHUNKSIZE, DSIZE, ExplicitAllocator, FixedSource, MIN_BLOCK};

/// Sentinel pair plus the seed chunk: the footprint of a fresh allocator.
const BOOT: usize = DSIZE + CHUNKSIZE;

fn allocator(capacity: usize) -> ExplicitAllocator<FixedSource> {
  ExplicitAllocator::bootstrap(FixedSource::with_capacity(capacity)).unwrap()
}

#[test]
fn fresh_allocation_carves_the_seed_block() {
  let mut allocator = allocator(BOOT);

  let payload = allocator.allocate(24);

  assert!(!payload.is_null());
  // 24 payload bytes + two tag words, rounded to a double word: 48.
  assert_eq!(allocator.free_blocks(), 1);
  assert_eq!(allocator.free_bytes(), CHUNKSIZE - 48);
  assert!(allocator.check());
}

#[test]
fn allocation_splits_off_the_residue() {
  let mut allocator = allocator(BOOT);

  let payload = allocator.allocate(32);

  assert!(!payload.is_null());
  assert_eq!(allocator.free_bytes(), CHUNKSIZE - 48);
  assert!(allocator.check());
}

#[test]
fn releasing_in_address_order_coalesces_forward() {
  let mut allocator = allocator(BOOT);

  let a = allocator.allocate(48);
  let b = allocator.allocate(48);

  allocator.release(a);
  allocator.release(b);

  assert_eq!(allocator.free_blocks(), 1);
  assert_eq!(allocator.free_bytes(), CHUNKSIZE);
  assert!(allocator.check());
}

#[test]
fn releasing_the_middle_block_last_coalesces_both_ways() {
  let mut allocator = allocator(BOOT);

  let a = allocator.allocate(48);
  let b = allocator.allocate(48);
  let c = allocator.allocate(48);

  allocator.release(a);
  allocator.release(c);
  allocator.release(b);

  assert_eq!(allocator.free_blocks(), 1);
  assert_eq!(allocator.free_bytes(), CHUNKSIZE);
  assert!(allocator.check());
}

#[test]
fn a_miss_on_the_free_list_extends_the_heap() {
  let mut allocator = allocator(DSIZE + 2 * CHUNKSIZE);

  // Two 2000-byte payloads (2016-byte blocks) exhaust the seed chunk.
  assert!(!allocator.allocate(2000).is_null());
  assert!(!allocator.allocate(2000).is_null());
  let before = allocator.heap_size();
  assert_eq!(before, BOOT);

  // The third request misses and grows the heap by one chunk. The new
  // block merges with the 64-byte residue at the old top, so a fourth
  // request fits as well.
  assert!(!allocator.allocate(2000).is_null());
  assert_eq!(allocator.heap_size(), before + CHUNKSIZE);
  assert!(!allocator.allocate(2000).is_null());

  // The fifth cannot fit and the source has nothing left.
  assert!(allocator.allocate(2000).is_null());
  assert!(allocator.check());
}

#[test]
fn an_exact_fit_consumes_the_block_without_splitting() {
  let mut allocator = allocator(DSIZE + 2 * CHUNKSIZE);

  // 4080 + two tag words is exactly the 4096-byte seed block.
  let payload = allocator.allocate(CHUNKSIZE - DSIZE);

  assert!(!payload.is_null());
  assert_eq!(allocator.free_blocks(), 0);
  assert!(allocator.check());

  // With the free list empty even a tiny request extends the heap.
  assert!(!allocator.allocate(16).is_null());
  assert_eq!(allocator.heap_size(), DSIZE + 2 * CHUNKSIZE);
  assert_eq!(allocator.free_bytes(), CHUNKSIZE - MIN_BLOCK);
  assert!(allocator.check());
}

#[test]
fn a_minimum_sized_residue_still_splits() {
  let mut allocator = allocator(BOOT);

  // 4048 + two tag words rounds to 4064, leaving exactly one minimum
  // block of residue.
  let payload = allocator.allocate(CHUNKSIZE - MIN_BLOCK - DSIZE);

  assert!(!payload.is_null());
  assert_eq!(allocator.free_blocks(), 1);
  assert_eq!(allocator.free_bytes(), MIN_BLOCK);
  assert!(allocator.check());
}

#[test]
fn payloads_are_double_word_aligned() {
  let mut allocator = allocator(DSIZE + 4 * CHUNKSIZE);

  for size in [1, 2, 7, 8, 15, 16, 17, 24, 100, 333, 1024] {
    let payload = allocator.allocate(size);

    assert!(!payload.is_null());
    assert_eq!(payload as usize % DSIZE, 0, "allocate({size}) misaligned");
  }

  assert!(allocator.check());
}

#[test]
fn a_freed_block_is_reused_lifo() {
  let mut allocator = allocator(BOOT);

  let a = allocator.allocate(64);
  let _wall = allocator.allocate(64);

  allocator.release(a);

  // The hole is the head of the free list and is scanned first.
  assert_eq!(allocator.allocate(64), a);
  assert!(allocator.check());
}

#[test]
fn payloads_hold_their_full_request_without_bleeding() {
  let mut allocator = allocator(DSIZE + 4 * CHUNKSIZE);

  let sizes = [100usize, 1, 512, 48, 2000];
  let payloads: Vec<(*mut u8, usize, u8)> = sizes
    .iter()
    .enumerate()
    .map(|(i, &size)| {
      let payload = allocator.allocate(size);
      assert!(!payload.is_null());
      (payload, size, 0x10 + i as u8)
    })
    .collect();

  // Fill every payload end to end, then verify nothing leaked across.
  for &(payload, size, tag) in &payloads {
    unsafe { payload.write_bytes(tag, size) };
  }

  for &(payload, size, tag) in &payloads {
    for offset in 0..size {
      assert_eq!(unsafe { *payload.add(offset) }, tag);
    }
  }

  assert!(allocator.check());
}

#[test]
fn release_restores_the_free_byte_total() {
  let mut allocator = allocator(BOOT);

  let resting = allocator.free_bytes();

  let payload = allocator.allocate(777);
  assert!(allocator.free_bytes() < resting);

  allocator.release(payload);

  assert_eq!(allocator.free_bytes(), resting);
  assert_eq!(allocator.free_blocks(), 1);
  assert!(allocator.check());
}

#[test]
fn exhaustion_returns_null_and_keeps_the_heap_usable() {
  let mut allocator = allocator(BOOT);

  assert!(allocator.allocate(2 * CHUNKSIZE).is_null());

  assert_eq!(allocator.free_bytes(), CHUNKSIZE);
  assert!(allocator.check());
  assert!(!allocator.allocate(128).is_null());
}

#[test]
fn random_workload_keeps_every_invariant() {
  let mut allocator = allocator(1 << 20);
  let mut rng = rand::thread_rng();
  let mut live: Vec<(usize, usize, u8)> = Vec::new();

  for round in 0..2000 {
    if live.is_empty() || rng.gen_bool(0.6) {
      let size = rng.gen_range(1..=512);
      let payload = allocator.allocate(size);

      if !payload.is_null() {
        let tag = rng.r#gen::<u8>();
        unsafe { payload.write_bytes(tag, size) };
        live.push((payload as usize, size, tag));
      }
    } else {
      let (address, size, tag) = live.swap_remove(rng.gen_range(0..live.len()));
      let payload = address as *mut u8;

      for offset in 0..size {
        assert_eq!(unsafe { *payload.add(offset) }, tag, "payload corrupted");
      }

      allocator.release(payload);
    }

    if round % 128 == 0 {
      assert!(allocator.check(), "invariants broke at round {round}");
    }
  }

  for (address, size, tag) in live.drain(..) {
    let payload = address as *mut u8;
    for offset in 0..size {
      assert_eq!(unsafe { *payload.add(offset) }, tag, "payload corrupted");
    }
    allocator.release(payload);
  }

  // Immediate coalescing folds a fully released heap into one block.
  assert_eq!(allocator.free_blocks(), 1);
  assert_eq!(allocator.free_bytes(), allocator.heap_size() - DSIZE);
  assert!(allocator.check());
}
