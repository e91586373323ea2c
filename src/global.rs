//! A [`Heap`] behind one coarse spinlock, usable as Rust's global allocator.
//!
//! ```rust,ignore
//! use rmalloc::LockedHeap;
//!
//! #[global_allocator]
//! static HEAP: LockedHeap<rmalloc::Sbrk> = LockedHeap::sbrk();
//! ```
//!
//! The heap logs through the `log` facade. A logger installed in a process
//! that allocates through this heap must not allocate while logging, or it
//! will deadlock on the lock.

use std::alloc::{GlobalAlloc, Layout};

use spin::{Mutex, MutexGuard};

use crate::{
  align::ALIGNMENT,
  brk::{ProgramBreak, Sbrk},
  config::HeapConfig,
  heap::Heap,
};

pub struct LockedHeap<B: ProgramBreak>(Mutex<Heap<B>>);

impl LockedHeap<Sbrk> {
  /// A heap on the process' program break, with the default configuration.
  pub const fn sbrk() -> Self {
    Self::new(Heap::new(Sbrk, HeapConfig::new()))
  }
}

impl<B: ProgramBreak> LockedHeap<B> {
  pub const fn new(heap: Heap<B>) -> Self {
    Self(Mutex::new(heap))
  }

  pub fn lock(&self) -> MutexGuard<'_, Heap<B>> {
    self.0.lock()
  }
}

/// Every payload is 16 byte aligned; layouts asking for more are refused.
unsafe impl<B: ProgramBreak + Send> GlobalAlloc for LockedHeap<B> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return std::ptr::null_mut();
    }
    match unsafe { self.lock().allocate(layout.size()) } {
      Ok(Some(ptr)) => ptr.as_ptr(),
      _ => std::ptr::null_mut(),
    }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return std::ptr::null_mut();
    }
    match unsafe { self.lock().allocate_zeroed(1, layout.size()) } {
      Ok(Some(ptr)) => ptr.as_ptr(),
      _ => std::ptr::null_mut(),
    }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    let _ = unsafe { self.lock().release(ptr) };
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return std::ptr::null_mut();
    }
    match unsafe { self.lock().resize(ptr, new_size) } {
      Ok(Some(ptr)) => ptr.as_ptr(),
      _ => std::ptr::null_mut(),
    }
  }
}
