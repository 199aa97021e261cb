use std::ptr::NonNull;

use rheapkeep::{Config, Heap, Sbrk};

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    Sbrk::program_break(),
  );
}

fn print_status(
  heap: &Heap<Sbrk>,
  label: &str,
) {
  println!("\n=== {label} ===");
  print!("{}", heap.heap_report());
  print!("{}", heap.index_report());
}

fn allocate(
  heap: &mut Heap<Sbrk>,
  size: usize,
) -> NonNull<u8> {
  let ptr = heap.allocate(size).unwrap_or_else(|err| panic!("allocate({size}) failed: {err}"));
  println!("allocate({size}) -> {:?}", ptr);
  ptr
}

fn main() {
  env_logger::init();

  // Nothing is reserved until the first allocation.
  let mut heap = Heap::new(Sbrk, Config::default());
  print_program_break("start");

  // --------------------------------------------------------------------
  // 1) The first allocation reserves the whole region in one sbrk call.
  // --------------------------------------------------------------------
  let first = allocate(&mut heap, 100);
  print_program_break("after first allocation");
  print_status(&heap, "After allocating 100 bytes");

  let second = allocate(&mut heap, 200);
  print_status(&heap, "After allocating 200 more bytes");

  // --------------------------------------------------------------------
  // 2) Freeing both merges them back with the tail of the region.
  // --------------------------------------------------------------------
  heap.release(first.as_ptr()).unwrap();
  print_status(&heap, "After freeing first allocation");

  heap.release(second.as_ptr()).unwrap();
  print_status(&heap, "After freeing second allocation");

  // --------------------------------------------------------------------
  // 3) Min-heap ordering: the smallest free block rises to the root.
  // --------------------------------------------------------------------
  let ptrs: Vec<_> = [500, 100, 300, 200, 400]
    .into_iter()
    .map(|size| allocate(&mut heap, size))
    .collect();

  for i in [1, 2, 0, 3, 4] {
    heap.release(ptrs[i].as_ptr()).unwrap();
    print_status(&heap, &format!("After freeing block {i}"));
  }

  // --------------------------------------------------------------------
  // 4) Grow a block: the contents follow it to its new home.
  // --------------------------------------------------------------------
  let small = allocate(&mut heap, 50);
  unsafe { small.as_ptr().write_bytes(0xCC, 50) };
  let _pin = allocate(&mut heap, 8);

  let grown = heap.resize(small.as_ptr(), 100).unwrap().unwrap();
  println!(
    "resize(50 -> 100): {:?} -> {:?}, first byte = {:#X}",
    small,
    grown,
    unsafe { grown.as_ptr().read() }
  );
  print_status(&heap, "After growing 50 -> 100");

  // --------------------------------------------------------------------
  // 5) Pointers the heap never handed out are rejected, not trusted.
  // --------------------------------------------------------------------
  let mut local = 0u8;
  if let Err(err) = heap.release(&mut local) {
    println!("release(stack pointer) rejected: {err}");
  }

  print_program_break("end");
  println!("\nEnd of walkthrough. The region stays reserved until the process exits.");
}
