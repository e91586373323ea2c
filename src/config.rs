use std::ffi::CStr;

use libc::{STDERR_FILENO, c_int};

use crate::{
  align::ALIGNMENT,
  block::HEADER_SIZE,
  error::{HeapError, HeapResult},
};

/// Bytes requested from the program break each time the heap runs dry.
pub const DEFAULT_INCREMENT: usize = 64_000;

/// Smallest increment that still leaves room for a header, a payload and
/// the alignment padding of an unaligned break.
pub const MIN_INCREMENT: usize = HEADER_SIZE + 2 * ALIGNMENT;

/// Environment variable that turns on the per-operation debug trace.
pub const DEBUG_ENV: &CStr = c"DEBUG_MALLOC";

/// Where the debug trace setting comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
  /// On when [`DEBUG_ENV`] is set, looked up on first use.
  Env,
  On,
  Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  increment: usize,
  debug: Toggle,
  trace_fd: c_int,
}

impl HeapConfig {
  pub const fn new() -> Self {
    Self {
      increment: DEFAULT_INCREMENT,
      debug: Toggle::Env,
      trace_fd: STDERR_FILENO,
    }
  }

  /// Sets the growth increment, rejecting values below [`MIN_INCREMENT`].
  pub fn with_increment(
    self,
    increment: usize,
  ) -> HeapResult<Self> {
    if increment < MIN_INCREMENT {
      return Err(HeapError::InvalidIncrement(increment));
    }
    Ok(Self { increment, ..self })
  }

  pub const fn with_debug(
    self,
    debug: Toggle,
  ) -> Self {
    Self { debug, ..self }
  }

  /// Sends the debug trace to `fd` instead of stderr. The descriptor is
  /// borrowed and never closed.
  pub const fn with_trace_fd(
    self,
    trace_fd: c_int,
  ) -> Self {
    Self { trace_fd, ..self }
  }

  pub const fn increment(&self) -> usize {
    self.increment
  }

  pub const fn debug(&self) -> Toggle {
    self.debug
  }

  pub const fn trace_fd(&self) -> c_int {
    self.trace_fd
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}

/// Reads [`DEBUG_ENV`] without touching the allocator.
pub fn debug_env_set() -> bool {
  unsafe { !libc::getenv(DEBUG_ENV.as_ptr()).is_null() }
}
