//! The OS boundary: something that hands out a single, upward-growing
//! region of memory, one increment at a time.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};
use log::trace;

use crate::error::{HeapError, HeapResult};

/// A program break, i.e. the end of a contiguous, extensible region.
///
/// Other code may move the same break between two calls, so consecutive
/// grants are not necessarily adjacent.
///
/// # Safety
/// On success `grow(delta)` must return the previous break, and the `delta`
/// bytes starting there must stay readable and writable until they are given
/// back with `shrink`. `shrink(delta)` must only retreat the break.
pub unsafe trait ProgramBreak {
  /// The break as it is right now.
  fn current(&self) -> *mut u8;

  /// Advances the break by `delta` bytes and returns the old break.
  fn grow(
    &mut self,
    delta: usize,
  ) -> HeapResult<*mut u8>;

  /// Retreats the break by `delta` bytes.
  fn shrink(
    &mut self,
    delta: usize,
  ) -> HeapResult<()>;
}

/// The process' real program break, moved with `sbrk(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

unsafe impl ProgramBreak for Sbrk {
  fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  fn grow(
    &mut self,
    delta: usize,
  ) -> HeapResult<*mut u8> {
    let increment =
      intptr_t::try_from(delta).map_err(|_| HeapError::OutOfMemory { requested: delta })?;

    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return Err(HeapError::OutOfMemory { requested: delta });
    }

    trace!("sbrk({}) = {:?}", delta, address);
    Ok(address as *mut u8)
  }

  fn shrink(
    &mut self,
    delta: usize,
  ) -> HeapResult<()> {
    let decrement = intptr_t::try_from(delta).map_err(|_| HeapError::ShrinkRefused(delta))?;

    let address = unsafe { sbrk(-decrement) };

    if address == usize::MAX as *mut c_void {
      return Err(HeapError::ShrinkRefused(delta));
    }

    trace!("sbrk(-{}) = {:?}", delta, address);
    Ok(())
  }
}

/// A simulated program break over a private, fixed-capacity allocation.
///
/// Growing past `capacity` fails like a refused `sbrk`. The first break can
/// be offset from the (page aligned) backing memory to mimic an unaligned
/// real break, and shrinking can be switched off to exercise that failure.
pub struct ArenaBreak {
  base: NonNull<u8>,
  layout: Layout,
  start: usize,
  brk: usize,
  refuse_shrink: bool,
  grow_calls: usize,
  shrink_calls: usize,
}

// The backing memory is owned exclusively by the arena.
unsafe impl Send for ArenaBreak {}

impl ArenaBreak {
  pub fn with_capacity(capacity: usize) -> HeapResult<Self> {
    Self::with_offset(capacity, 0)
  }

  /// An arena whose first break sits `offset` bytes into the backing memory.
  /// Fails with [`HeapError::OutOfMemory`] when the backing memory cannot be
  /// obtained.
  pub fn with_offset(
    capacity: usize,
    offset: usize,
  ) -> HeapResult<Self> {
    let layout = Layout::from_size_align(capacity.max(1), 4096)
      .map_err(|_| HeapError::OutOfMemory { requested: capacity })?;
    let base = NonNull::new(unsafe { alloc::alloc(layout) })
      .ok_or(HeapError::OutOfMemory { requested: capacity })?;

    let start = offset.min(capacity);
    Ok(Self {
      base,
      layout,
      start,
      brk: start,
      refuse_shrink: false,
      grow_calls: 0,
      shrink_calls: 0,
    })
  }

  pub fn refuse_shrink(
    &mut self,
    refuse: bool,
  ) {
    self.refuse_shrink = refuse;
  }

  /// The break before anything was granted.
  pub fn initial(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.start) }
  }

  /// Bytes currently granted.
  pub fn used(&self) -> usize {
    self.brk - self.start
  }

  pub fn grow_calls(&self) -> usize {
    self.grow_calls
  }

  pub fn shrink_calls(&self) -> usize {
    self.shrink_calls
  }
}

unsafe impl ProgramBreak for ArenaBreak {
  fn current(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.brk) }
  }

  fn grow(
    &mut self,
    delta: usize,
  ) -> HeapResult<*mut u8> {
    self.grow_calls += 1;

    match self.brk.checked_add(delta) {
      Some(brk) if brk <= self.layout.size() => {
        let old = self.current();
        self.brk = brk;
        Ok(old)
      }
      _ => Err(HeapError::OutOfMemory { requested: delta }),
    }
  }

  fn shrink(
    &mut self,
    delta: usize,
  ) -> HeapResult<()> {
    self.shrink_calls += 1;

    if self.refuse_shrink || delta > self.brk - self.start {
      return Err(HeapError::ShrinkRefused(delta));
    }
    self.brk -= delta;
    Ok(())
  }
}

impl Drop for ArenaBreak {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_grows_and_shrinks() {
    let mut arena = ArenaBreak::with_capacity(1024).unwrap();
    let initial = arena.initial();

    let first = arena.grow(512).unwrap();
    assert_eq!(first, initial);
    assert_eq!(arena.used(), 512);

    let second = arena.grow(256).unwrap();
    assert_eq!(second as usize, initial as usize + 512);

    arena.shrink(256).unwrap();
    assert_eq!(arena.current(), second);
    assert_eq!(arena.grow_calls(), 2);
    assert_eq!(arena.shrink_calls(), 1);
  }

  #[test]
  fn test_arena_refuses_growth_past_capacity() {
    let mut arena = ArenaBreak::with_capacity(1024).unwrap();

    arena.grow(1000).unwrap();
    assert_eq!(arena.grow(100), Err(HeapError::OutOfMemory { requested: 100 }));
    assert_eq!(arena.used(), 1000);
  }

  #[test]
  fn test_arena_shrink_refusal() {
    let mut arena = ArenaBreak::with_capacity(1024).unwrap();
    arena.grow(128).unwrap();

    assert_eq!(arena.shrink(256), Err(HeapError::ShrinkRefused(256)));

    arena.refuse_shrink(true);
    assert_eq!(arena.shrink(128), Err(HeapError::ShrinkRefused(128)));
    assert_eq!(arena.used(), 128);
  }

  #[test]
  fn test_arena_offset_start() {
    let mut arena = ArenaBreak::with_offset(1024, 3).unwrap();
    assert_eq!(arena.initial() as usize % 4096, 3);
    assert_eq!(arena.grow(16).unwrap(), arena.initial());
  }

  #[test]
  fn test_arena_capacity_overflow_is_an_error() {
    assert_eq!(
      ArenaBreak::with_capacity(usize::MAX).err(),
      Some(HeapError::OutOfMemory { requested: usize::MAX })
    );
  }

  #[test]
  fn test_sbrk_reports_the_current_break() {
    assert!(!Sbrk.current().is_null());
  }
}
