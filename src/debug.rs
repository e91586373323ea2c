//! Per-operation trace lines, written straight to stderr or another
//! descriptor.
//!
//! The trace runs inside the allocator, so it must never allocate: lines are
//! formatted into a fixed buffer on the stack and handed to `write(2)`.

use std::fmt::{self, Write};

use libc::{STDERR_FILENO, c_int, c_void, write};

use crate::{
  brk::ArenaBreak,
  config::{HeapConfig, Toggle, debug_env_set},
  error::{HeapError, HeapResult},
  heap::Heap,
};

const LINE_CAPACITY: usize = 192;

/// A line of at most `LINE_CAPACITY` bytes; anything longer is cut off.
pub struct LineBuf {
  buf: [u8; LINE_CAPACITY],
  len: usize,
}

impl LineBuf {
  pub const fn new() -> Self {
    Self {
      buf: [0; LINE_CAPACITY],
      len: 0,
    }
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.buf[..self.len]
  }

  /// Formats `args` followed by a newline. The newline survives truncation.
  pub fn format(args: fmt::Arguments<'_>) -> Self {
    let mut line = Self::new();
    let _ = line.write_fmt(args);
    if line.len == LINE_CAPACITY {
      line.len -= 1;
    }
    line.buf[line.len] = b'\n';
    line.len += 1;
    line
  }
}

impl Write for LineBuf {
  fn write_str(
    &mut self,
    s: &str,
  ) -> fmt::Result {
    let room = LINE_CAPACITY - self.len;
    let n = s.len().min(room);
    self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
    self.len += n;
    if n < s.len() { Err(fmt::Error) } else { Ok(()) }
  }
}

/// Decides whether trace lines are emitted, and emits them.
pub struct DebugSink {
  toggle: Toggle,
  resolved: Option<bool>,
  fd: c_int,
}

impl DebugSink {
  pub const fn new(
    toggle: Toggle,
    fd: c_int,
  ) -> Self {
    Self {
      toggle,
      resolved: None,
      fd,
    }
  }

  pub fn enabled(&mut self) -> bool {
    match self.toggle {
      Toggle::On => true,
      Toggle::Off => false,
      Toggle::Env => *self.resolved.get_or_insert_with(debug_env_set),
    }
  }

  pub fn emit(
    &mut self,
    args: fmt::Arguments<'_>,
  ) {
    if self.enabled() {
      let line = LineBuf::format(args);
      let bytes = line.as_bytes();
      // Best effort; a short or failed write loses part of a trace line.
      unsafe {
        write(self.fd, bytes.as_ptr() as *const c_void, bytes.len());
      }
    }
  }
}

/// Checks the debug toggle, announces itself when it is on, and runs a short
/// allocate/resize/release cycle on a private arena.
pub fn self_test() -> HeapResult<()> {
  let mut sink = DebugSink::new(Toggle::Env, STDERR_FILENO);
  sink.emit(format_args!("rmalloc: self-test"));

  let config = HeapConfig::new().with_increment(4096)?.with_debug(Toggle::Off);
  let mut heap = Heap::new(ArenaBreak::with_capacity(64 * 1024)?, config);

  unsafe {
    let first = heap
      .allocate(100)?
      .ok_or(HeapError::OutOfMemory { requested: 100 })?;
    first.as_ptr().write_bytes(0x5a, 100);

    let grown = heap
      .resize(first.as_ptr(), 10_000)?
      .ok_or(HeapError::OutOfMemory { requested: 10_000 })?;
    let intact = std::slice::from_raw_parts(grown.as_ptr(), 100).iter().all(|&b| b == 0x5a);

    heap.release(grown.as_ptr())?;
    heap.check()?;

    if !intact || !heap.is_empty() {
      return Err(HeapError::Corrupted {
        addr: grown.as_ptr() as usize,
        reason: "self-test round trip lost data or memory",
      });
    }
  }

  sink.emit(format_args!("rmalloc: self-test passed"));
  Ok(())
}
