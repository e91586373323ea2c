use std::mem;

use crate::align;

/// In-band header written at the start of every block. The payload follows
/// it at `HEADER_SIZE` bytes.
#[repr(C)]
pub struct Block {
  pub size: usize,
  pub is_free: bool,
  pub next: *mut Block,
}

/// Bytes a header occupies in the heap, padded so payloads stay aligned.
pub const HEADER_SIZE: usize = align!(mem::size_of::<Block>());

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    next: *mut Block,
  ) -> Self {
    Self { size, is_free, next }
  }

  /// Writes a fresh header at `addr` and returns it.
  ///
  /// # Safety
  /// `addr` must be aligned and have `HEADER_SIZE` writable bytes.
  pub unsafe fn write(
    addr: usize,
    block: Block,
  ) -> *mut Block {
    let header = addr as *mut Block;
    unsafe { header.write(block) };
    header
  }

  pub fn addr(&self) -> usize {
    self as *const Block as usize
  }

  pub fn payload(&self) -> *mut u8 {
    (self.addr() + HEADER_SIZE) as *mut u8
  }

  /// First address past this block's payload.
  pub fn end(&self) -> usize {
    self.addr() + HEADER_SIZE + self.size
  }

  /// Whether `addr` falls anywhere in the header or payload.
  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    (self.addr()..self.end()).contains(&addr)
  }
}

/// A snapshot of one block, as yielded by [`Heap::blocks`](crate::Heap::blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub addr: usize,
  pub size: usize,
  pub is_free: bool,
}

impl BlockInfo {
  pub fn payload(&self) -> *mut u8 {
    (self.addr + HEADER_SIZE) as *mut u8
  }

  pub fn end(&self) -> usize {
    self.addr + HEADER_SIZE + self.size
  }
}

impl From<&Block> for BlockInfo {
  fn from(block: &Block) -> Self {
    Self {
      addr: block.addr(),
      size: block.size,
      is_free: block.is_free,
    }
  }
}
