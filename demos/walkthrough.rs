use std::io::Read;

use rmalloc::{ArenaBreak, Heap, HeapConfig, ProgramBreak, Toggle};

/// Waits until the user presses ENTER.
/// Pass `--no-wait` to run straight through.
fn block_until_enter_pressed() {
  if std::env::args().any(|arg| arg == "--no-wait") {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block and where the simulated program break currently is.
fn print_heap(
  label: &str,
  heap: &Heap<ArenaBreak>,
) {
  println!(
    "[{}] program break = {:?} ({} bytes granted)",
    label,
    heap.program_break().current(),
    heap.program_break().used()
  );
  for block in heap.blocks() {
    println!(
      "    {:#x}  {:>6} bytes  {}",
      block.addr,
      block.size,
      if block.is_free { "free" } else { "used" }
    );
  }
}

fn main() {
  // A simulated break keeps the demo away from the real one, which the
  // system allocator behind `println!` may be using. The trace is on, so
  // every operation also prints its own line to stderr.
  let config = HeapConfig::new()
    .with_increment(4096)
    .expect("4096 is a valid increment")
    .with_debug(Toggle::On);
  let arena = ArenaBreak::with_capacity(1 << 20).expect("1 MiB arena");
  let mut heap = Heap::new(arena, config);

  unsafe {
    print_heap("start", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) The first allocation grows the heap by one increment and splits
    //    the fresh block in two.
    // --------------------------------------------------------------------
    let first = heap.allocate(64).unwrap().unwrap();
    first.as_ptr().cast::<u32>().write(0xDEADBEEF);
    println!("\n[1] Allocate [u32; 16]");
    print_heap("1", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Odd sizes are rounded up to 16 bytes.
    // --------------------------------------------------------------------
    let second = heap.allocate(12).unwrap().unwrap();
    second.as_ptr().write_bytes(0xAB, 12);
    println!("\n[2] Allocate [u8; 12]");
    print_heap("2", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Releasing the first block leaves a hole...
    // --------------------------------------------------------------------
    heap.release(first.as_ptr()).unwrap();
    println!("\n[3] Release first block");
    print_heap("3", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) ...which first fit hands out again, since it has room for the
    //    request plus a header.
    // --------------------------------------------------------------------
    let third = heap.allocate(2).unwrap().unwrap();
    println!(
      "\n[4] Allocate [u8; 2]: reused the hole? {}",
      if third == first { "yes" } else { "no" }
    );
    print_heap("4", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A request bigger than one increment grows the break several times.
    // --------------------------------------------------------------------
    let big = heap.allocate(10_000).unwrap().unwrap();
    println!("\n[5] Allocate 10 000 bytes");
    print_heap("5", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Resizing the tail block grows it in place.
    // --------------------------------------------------------------------
    let big = heap.resize(big.as_ptr(), 20_000).unwrap().unwrap();
    println!("\n[6] Resize to 20 000 bytes");
    print_heap("6", &heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Releasing everything coalesces the blocks and hands the memory
    //    back to the break.
    // --------------------------------------------------------------------
    heap.release(big.as_ptr()).unwrap();
    heap.release(second.as_ptr()).unwrap();
    heap.release(third.as_ptr()).unwrap();
    println!("\n[7] Release everything");
    print_heap("7", &heap);

    heap.check().expect("heap is consistent");
    println!("\n[8] End of walkthrough, heap empty: {}", heap.is_empty());
  }
}
