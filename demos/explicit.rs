use std::ptr;

use tagalloc::{CHUNKSIZE, ExplicitAllocator, FixedSource};
use tracing_subscriber::EnvFilter;

/// A narrated walkthrough of the allocator: allocation, splitting,
/// coalescing and heap growth, with a heap dump after every step.
///
/// Run with `RUST_LOG=tagalloc=trace` to watch the internal operations
/// interleaved with the dumps. The demo uses a fixed-capacity source so
/// every run prints the same block sizes; swap in `SbrkSource::new()` to
/// drive the program break instead.
fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let source = FixedSource::with_capacity(3 * CHUNKSIZE);
  let mut allocator = ExplicitAllocator::bootstrap(source).expect("bootstrap failed");

  println!("[0] Fresh heap: one {CHUNKSIZE}-byte free block between the sentinels");
  allocator.dump_heap();

  // --------------------------------------------------------------------
  // 1) Three allocations carve the seed block from the front.
  // --------------------------------------------------------------------
  let a = allocator.allocate(100);
  let b = allocator.allocate(200);
  let c = allocator.allocate(300);
  println!("\n[1] Allocate 100, 200 and 300 bytes");
  println!("[1] a = {a:?}, b = {b:?}, c = {c:?}");
  allocator.dump_heap();

  // Write into the payloads to show they are usable.
  unsafe {
    ptr::write_bytes(a, 0xAA, 100);
    ptr::write_bytes(b, 0xBB, 200);
    ptr::write_bytes(c, 0xCC, 300);
  }
  println!("[1] Filled each payload with a byte pattern");

  // --------------------------------------------------------------------
  // 2) Release the middle block: it cannot merge with either neighbour,
  //    so it becomes the head of the free list on its own.
  // --------------------------------------------------------------------
  allocator.release(b);
  println!("\n[2] Release b (both neighbours still allocated)");
  allocator.dump_heap();

  // --------------------------------------------------------------------
  // 3) A request that fits in the hole reuses it, first fit.
  // --------------------------------------------------------------------
  let d = allocator.allocate(64);
  println!("\n[3] Allocate 64 bytes (lands in the hole b left behind)");
  println!(
    "[3] d == old b? {}",
    if d == b { "yes, the freed block was reused" } else { "no" }
  );
  allocator.dump_heap();

  // --------------------------------------------------------------------
  // 4) Release a and d. Releasing d merges it with the residue of the
  //    hole; the heap is back to free-alloc-free around c.
  // --------------------------------------------------------------------
  allocator.release(a);
  allocator.release(d);
  println!("\n[4] Release a and d (d coalesces with its free neighbours)");
  allocator.dump_heap();

  // --------------------------------------------------------------------
  // 5) Release c: everything in front of and behind it is free, so one
  //    release folds the whole heap back into a single block.
  // --------------------------------------------------------------------
  allocator.release(c);
  println!("\n[5] Release c (merges in both directions)");
  println!(
    "[5] Back to a single free block: {} blocks, {} bytes free",
    allocator.free_blocks(),
    allocator.free_bytes(),
  );
  allocator.dump_heap();

  // --------------------------------------------------------------------
  // 6) A request larger than the free block forces a heap extension.
  // --------------------------------------------------------------------
  let big = allocator.allocate(CHUNKSIZE);
  println!("\n[6] Allocate {CHUNKSIZE} bytes (forces the heap to grow)");
  println!("[6] big = {big:?}, heap is now {} bytes", allocator.heap_size());
  allocator.dump_heap();

  // --------------------------------------------------------------------
  // 7) The source is exhausted now: a too-large request returns null and
  //    leaves the heap untouched.
  // --------------------------------------------------------------------
  let failed = allocator.allocate(4 * CHUNKSIZE);
  println!("\n[7] Allocate {} bytes: returned {:?}", 4 * CHUNKSIZE, failed);

  allocator.release(big);
  println!("\n[8] Final state, checker says consistent = {}", allocator.check());
  allocator.dump_heap();
}
