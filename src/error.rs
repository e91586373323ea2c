use thiserror::Error;

/// Heap operation result
pub type HeapResult<T> = Result<T, HeapError>;

/// Heap errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  #[error("Out of memory: no room for {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("Allocation size overflow: {count} * {size} does not fit in usize")]
  Overflow { count: usize, size: usize },

  #[error("Program break moved behind our back: expected 0x{expected:x}, found 0x{found:x}")]
  BreakMoved { expected: usize, found: usize },

  #[error("Pointer 0x{0:x} is not managed by this heap")]
  UnmanagedPointer(usize),

  #[error("Block at 0x{0:x} is not allocated")]
  NotAllocated(usize),

  #[error("Program break refused to shrink by {0} bytes")]
  ShrinkRefused(usize),

  #[error("Heap increment of {0} bytes cannot hold a header and a payload")]
  InvalidIncrement(usize),

  #[error("Heap corruption detected at 0x{addr:x}: {reason}")]
  Corrupted { addr: usize, reason: &'static str },
}

impl HeapError {
  /// Errors a C caller sees as `ENOMEM`.
  pub fn is_out_of_memory(&self) -> bool {
    matches!(
      self,
      HeapError::OutOfMemory { .. } | HeapError::Overflow { .. } | HeapError::BreakMoved { .. }
    )
  }

  /// Restates a failed growth step in terms of the caller's request.
  pub(crate) fn for_request(
    self,
    requested: usize,
  ) -> Self {
    match self {
      HeapError::OutOfMemory { .. } => HeapError::OutOfMemory { requested },
      other => other,
    }
  }
}
