use std::{
  fmt,
  marker::PhantomData,
  ptr::{self, NonNull},
};

use log::{trace, warn};

use crate::{
  align,
  align::{ALIGNMENT, checked_align_up},
  align_down,
  block::{Block, BlockInfo, HEADER_SIZE},
  brk::ProgramBreak,
  config::HeapConfig,
  debug::DebugSink,
  error::{HeapError, HeapResult},
};

/// A first-fit heap over an address-ordered list of blocks whose headers
/// live inside the memory they describe.
pub struct Heap<B: ProgramBreak> {
  head: *mut Block,
  /// End of the topmost extent. Matches the real break unless someone else
  /// has moved it since.
  brk: usize,
  program_break: B,
  config: HeapConfig,
  sink: DebugSink,
}

// The heap exclusively owns every block reachable from `head`.
unsafe impl<B: ProgramBreak + Send> Send for Heap<B> {}

impl<B: ProgramBreak> Heap<B> {
  pub const fn new(
    program_break: B,
    config: HeapConfig,
  ) -> Self {
    Self {
      head: ptr::null_mut(),
      brk: 0,
      program_break,
      config,
      sink: DebugSink::new(config.debug(), config.trace_fd()),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  /// `(first header, end of the topmost extent)` while the heap holds memory.
  pub fn extent(&self) -> Option<(usize, usize)> {
    (!self.head.is_null()).then(|| (self.head as usize, self.brk))
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn program_break(&self) -> &B {
    &self.program_break
  }

  pub fn program_break_mut(&mut self) -> &mut B {
    &mut self.program_break
  }

  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.head,
      _heap: PhantomData,
    }
  }

  /// Walks the list and verifies that blocks are aligned, ordered without
  /// overlap, inside the granted memory, and that no two touching blocks are
  /// both free. Blocks in different extents are separated by memory the heap
  /// does not own.
  pub fn check(&self) -> HeapResult<()> {
    let mut previous: Option<BlockInfo> = None;

    for block in self.blocks() {
      if block.addr % ALIGNMENT != 0 {
        return corrupted(block.addr, "misaligned header");
      }
      if block.size % ALIGNMENT != 0 {
        return corrupted(block.addr, "size is not a multiple of the alignment");
      }
      if block.end() > self.brk {
        return corrupted(block.addr, "block runs past the program break");
      }
      if let Some(previous) = previous {
        if block.addr < previous.end() {
          return corrupted(block.addr, "block overlaps its predecessor");
        }
        if block.addr == previous.end() && previous.is_free && block.is_free {
          return corrupted(block.addr, "adjacent free blocks");
        }
      }
      previous = Some(block);
    }

    if let Some(tail) = previous {
      if self.brk - tail.end() >= ALIGNMENT {
        return corrupted(tail.addr, "untracked memory after the tail");
      }
    }
    Ok(())
  }

  /// Returns a pointer to at least `size` bytes, or `None` for `size == 0`.
  ///
  /// # Safety
  /// The heap trusts its in-band headers: writing outside a granted payload
  /// corrupts it.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    let outcome = if size == 0 {
      Ok(None)
    } else {
      unsafe { self.allocate_block(size).map(Some) }
    };

    self.report(format_args!("malloc({})", size), &outcome);
    outcome.map(payload_of)
  }

  /// Like [`allocate`](Self::allocate) for `count * size` bytes, all zeroed.
  /// A product that overflows `usize` fails with [`HeapError::Overflow`].
  ///
  /// # Safety
  /// See [`allocate`](Self::allocate).
  pub unsafe fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    let outcome = match count.checked_mul(size) {
      None => Err(HeapError::Overflow { count, size }),
      Some(0) => Ok(None),
      Some(total) => unsafe {
        self.allocate_block(total).map(|block| {
          ptr::write_bytes((*block).payload(), 0, total);
          Some(block)
        })
      },
    };

    self.report(format_args!("calloc({}, {})", count, size), &outcome);
    outcome.map(payload_of)
  }

  /// Resizes the allocation containing `ptr` to `size` bytes, in place when
  /// possible. A null `ptr` allocates, a zero `size` releases.
  ///
  /// A block that becomes the tail by absorbing free successors is grown in
  /// place, just like one that was the tail to begin with, rather than moved.
  /// When the allocation has to move, the old payload is copied over and the
  /// old block released. On error the original allocation is left as it was.
  ///
  /// # Safety
  /// See [`allocate`](Self::allocate). After a move, `ptr` is dangling.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    let outcome = unsafe { self.resize_block(ptr, size) };

    self.report(format_args!("realloc({:?}, {})", ptr, size), &outcome);
    outcome.map(payload_of)
  }

  /// Gives the block containing `ptr` back to the heap. Null is a no-op.
  ///
  /// Pointers the heap does not know, or whose block is already free, are
  /// reported as errors and leave the heap untouched.
  ///
  /// # Safety
  /// See [`allocate`](Self::allocate). `ptr` must not be used afterwards.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) -> HeapResult<()> {
    let outcome = unsafe { self.release_block(ptr) };

    match &outcome {
      Ok(()) => self.sink.emit(format_args!("free({:?})", ptr)),
      Err(err) => self.sink.emit(format_args!("free({:?}) ignored: {}", ptr, err)),
    }
    outcome
  }

  unsafe fn allocate_block(
    &mut self,
    size: usize,
  ) -> HeapResult<*mut Block> {
    unsafe {
      let aligned = checked_align_up(size).ok_or(HeapError::OutOfMemory { requested: size })?;
      let target = aligned
        .checked_add(HEADER_SIZE)
        .ok_or(HeapError::OutOfMemory { requested: size })?;

      let block = loop {
        if let Some(block) = self.find_fit(target) {
          break block;
        }
        if let Err(err) = self.grow() {
          self.trim();
          return Err(err.for_request(size));
        }
      };

      (*block).is_free = false;
      self.split(block, aligned);

      Ok(block)
    }
  }

  unsafe fn resize_block(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> HeapResult<Option<*mut Block>> {
    unsafe {
      if ptr.is_null() {
        return if size == 0 { Ok(None) } else { self.allocate_block(size).map(Some) };
      }
      if size == 0 {
        self.release_block(ptr)?;
        return Ok(None);
      }

      let block = self.allocated_block(ptr)?;
      let aligned = checked_align_up(size).ok_or(HeapError::OutOfMemory { requested: size })?;

      self.split(block, aligned);
      if (*block).size >= aligned {
        return Ok(Some(block));
      }

      let old_size = (*block).size;
      while (*block).size < aligned && self.merge_with_next(block).is_some() {}

      if (*block).size < aligned && (*block).next.is_null() {
        // A free tail is what `grow` extends in place. A grant that lands
        // elsewhere leaves the move below to use it.
        (*block).is_free = true;
        let mut grown = Ok(());
        while (*block).size < aligned {
          match self.grow() {
            Ok(extended) if extended == block => {}
            Ok(_) => break,
            Err(err) => {
              grown = Err(err.for_request(size));
              break;
            }
          }
        }
        (*block).is_free = false;

        if let Err(err) = grown {
          self.split(block, old_size);
          self.trim();
          return Err(err);
        }
      }

      if (*block).size < aligned {
        self.split(block, old_size);

        let moved = self.allocate_block(size)?;
        ptr::copy_nonoverlapping((*block).payload(), (*moved).payload(), old_size);
        self.release_block((*block).payload())?;

        return Ok(Some(moved));
      }

      self.split(block, aligned);
      Ok(Some(block))
    }
  }

  unsafe fn release_block(
    &mut self,
    ptr: *mut u8,
  ) -> HeapResult<()> {
    unsafe {
      if ptr.is_null() {
        return Ok(());
      }

      let block = self.allocated_block(ptr)?;
      (*block).is_free = true;
      self.merge_with_next(block);

      let mut survivor = block;
      let mut predecessor = self.predecessor(block);
      if let Some(previous) = predecessor {
        if (*previous).is_free && self.merge_with_next(previous).is_some() {
          survivor = previous;
          predecessor = self.predecessor(previous);
        }
      }

      if (*survivor).next.is_null() {
        self.shrink_tail(survivor, predecessor);
      }
      Ok(())
    }
  }

  /// The allocated block owning `ptr`.
  unsafe fn allocated_block(
    &self,
    ptr: *mut u8,
  ) -> HeapResult<*mut Block> {
    let block = unsafe { self.find_containing(ptr as usize) }
      .ok_or(HeapError::UnmanagedPointer(ptr as usize))?;

    if unsafe { (*block).is_free } {
      return Err(HeapError::NotAllocated(ptr as usize));
    }
    Ok(block)
  }

  /// Extends the heap by one increment and returns the free block that
  /// received it. The list is only touched once the program break has
  /// granted the memory.
  ///
  /// A grant right at the end of the topmost extent continues it. If someone
  /// else has moved the break in between, the grant starts a new extent and
  /// the foreign bytes below it are never handed out.
  unsafe fn grow(&mut self) -> HeapResult<*mut Block> {
    unsafe {
      let increment = self.config.increment();
      let base = self.program_break.grow(increment)? as usize;
      let end = base + increment;

      if !self.head.is_null() && base < self.brk {
        let err = HeapError::BreakMoved {
          expected: self.brk,
          found: base,
        };
        warn!("{}", err);
        if let Err(shrink) = self.program_break.shrink(increment) {
          warn!("{}", shrink);
        }
        return Err(err);
      }

      let tail = self.tail();
      let adjacent = !tail.is_null() && base == self.brk;

      let grown = if adjacent && (*tail).is_free {
        (*tail).size = align_down!(end - (*tail).payload() as usize);
        tail
      } else {
        let start = if adjacent { (*tail).end() } else { align!(base) };
        let size = align_down!(end - start - HEADER_SIZE);
        let block = Block::write(start, Block::new(size, true, ptr::null_mut()));

        if tail.is_null() {
          self.head = block;
          trace!("heap started at {:#x} with {} bytes", start, size);
        } else {
          (*tail).next = block;
          if !adjacent {
            warn!(
              "program break moved from {:#x} to {:#x}, starting a new extent",
              self.brk, base
            );
          }
        }
        block
      };
      self.brk = end;

      trace!("heap grew by {} bytes to {:#x}", increment, end);
      Ok(grown)
    }
  }

  /// Hands a free tail back to the program break, unlinking it from
  /// `predecessor`. Nothing is shrunk while foreign memory sits above the
  /// heap. A refused shrink leaves the block tracked and free.
  unsafe fn shrink_tail(
    &mut self,
    tail: *mut Block,
    predecessor: Option<*mut Block>,
  ) {
    if self.program_break.current() as usize != self.brk {
      trace!("program break is above the heap, keeping the free tail");
      return;
    }

    unsafe {
      let addr = (*tail).addr();
      let delta = self.brk - addr;

      match self.program_break.shrink(delta) {
        Ok(()) => {
          // A predecessor in a lower extent ends below foreign memory.
          self.brk = match predecessor {
            Some(previous) => {
              (*previous).next = ptr::null_mut();
              (*previous).end()
            }
            None => {
              self.head = ptr::null_mut();
              addr
            }
          };
          trace!("heap shrank by {} bytes to {:#x}", delta, addr);
        }
        Err(err) => {
          warn!("{}", err);
          self.sink.emit(format_args!("rmalloc: {}", err));
        }
      }
    }
  }

  /// Returns a free tail to the program break, if there is one.
  unsafe fn trim(&mut self) {
    unsafe {
      let tail = self.tail();
      if !tail.is_null() && (*tail).is_free {
        let predecessor = self.predecessor(tail);
        self.shrink_tail(tail, predecessor);
      }
    }
  }

  unsafe fn tail(&self) -> *mut Block {
    unsafe {
      let mut current = self.head;

      while !current.is_null() && !(*current).next.is_null() {
        current = (*current).next;
      }

      current
    }
  }

  /// First free block, in address order, with at least `size` bytes.
  unsafe fn find_fit(
    &self,
    size: usize,
  ) -> Option<*mut Block> {
    unsafe {
      let mut current = self.head;

      while !current.is_null() {
        if (*current).is_free && (*current).size >= size {
          return Some(current);
        }
        current = (*current).next;
      }

      None
    }
  }

  /// The block whose header or payload contains `addr`.
  unsafe fn find_containing(
    &self,
    addr: usize,
  ) -> Option<*mut Block> {
    unsafe {
      let mut current = self.head;

      while !current.is_null() {
        if (*current).contains(addr) {
          return Some(current);
        }
        current = (*current).next;
      }

      None
    }
  }

  /// The block linked right before `block`. It does not necessarily touch
  /// `block`: the two may sit in different extents.
  unsafe fn predecessor(
    &self,
    block: *mut Block,
  ) -> Option<*mut Block> {
    unsafe {
      let mut current = self.head;

      while !current.is_null() {
        if (*current).next == block {
          return Some(current);
        }
        current = (*current).next;
      }

      None
    }
  }

  /// Shrinks `block` to `size` (rounded up) and turns the excess into a new
  /// free block, provided the excess can hold a header and a non-empty
  /// payload. Returns the new block.
  unsafe fn split(
    &mut self,
    block: *mut Block,
    size: usize,
  ) -> Option<*mut Block> {
    unsafe {
      let size = checked_align_up(size)?;
      let total = size.checked_add(HEADER_SIZE)?;
      if (*block).size <= total {
        return None;
      }

      let remainder = Block::write(
        (*block).payload() as usize + size,
        Block::new((*block).size - total, true, (*block).next),
      );
      (*block).size = size;
      (*block).next = remainder;

      self.merge_with_next(remainder);
      Some(remainder)
    }
  }

  /// Absorbs the successor of `block` if it is free and starts right where
  /// `block` ends.
  unsafe fn merge_with_next(
    &mut self,
    block: *mut Block,
  ) -> Option<*mut Block> {
    unsafe {
      let next = (*block).next;
      if next.is_null() || !(*next).is_free || (*block).end() != next as usize {
        return None;
      }

      (*block).size += (*next).size + HEADER_SIZE;
      (*block).next = (*next).next;
      Some(block)
    }
  }

  fn report(
    &mut self,
    call: fmt::Arguments<'_>,
    outcome: &HeapResult<Option<*mut Block>>,
  ) {
    match outcome {
      Ok(Some(block)) => {
        let (payload, size) = unsafe { ((**block).payload(), (**block).size) };
        self.sink.emit(format_args!("{} = {:?} [{} bytes]", call, payload, size));
      }
      Ok(None) => self.sink.emit(format_args!("{} = 0x0", call)),
      Err(err) => self.sink.emit(format_args!("{} failed: {}", call, err)),
    }
  }
}

fn payload_of(block: Option<*mut Block>) -> Option<NonNull<u8>> {
  block.and_then(|block| NonNull::new(unsafe { (*block).payload() }))
}

fn corrupted(
  addr: usize,
  reason: &'static str,
) -> HeapResult<()> {
  Err(HeapError::Corrupted { addr, reason })
}

/// Iterator over the blocks of a [`Heap`], in address order.
pub struct Blocks<'a> {
  current: *const Block,
  _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = unsafe { self.current.as_ref()? };
    self.current = block.next;
    Some(BlockInfo::from(block))
  }
}
