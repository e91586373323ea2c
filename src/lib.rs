//! # rmalloc - A First-Fit Free-List Allocator
//!
//! This crate provides a **free-list heap** that grows and shrinks the
//! program break (`sbrk`) and can stand in for `malloc`, `calloc`,
//! `realloc` and `free`.
//!
//! ## Overview
//!
//! The heap is a contiguous region. Every byte of it belongs to a block,
//! and every block starts with a small header:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            HEAP MEMORY                               │
//!   │                                                                      │
//!   │   ┌────┬──────┬────┬──────────┬────┬──────┬────┬─────────────────┐   │
//!   │   │ H  │ used │ H  │   free   │ H  │ used │ H  │      free       │   │
//!   │   └────┴──────┴────┴──────────┴────┴──────┴────┴─────────────────┘   │
//!   │   ▲  next │     ▲  next │       ▲  next │     ▲                   ▲   │
//!   │   │       └─────┘       └───────┘       └─────┘                   │   │
//!   │  head                                                       Program  │
//!   │                                                              Break   │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Blocks are linked in address order and are exactly adjacent.
//!   No two neighbours are ever both free.
//!
//!   If other code moves the break in between, the heap continues in a
//!   new extent above it and the foreign bytes are left alone.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - Alignment macros (align!, align_down!)
//!   ├── block      - In-band block header
//!   ├── brk        - Program break backends (Sbrk, ArenaBreak)
//!   ├── config     - HeapConfig, DEBUG_MALLOC toggle
//!   ├── debug      - Allocation-free trace lines, self-test
//!   ├── error      - HeapError
//!   ├── heap       - Heap: first fit, split, coalesce, grow, shrink
//!   ├── global     - LockedHeap, a GlobalAlloc over a spinlocked Heap
//!   └── ffi        - C entry points (rm_malloc & co, or malloc & co)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rmalloc::{ArenaBreak, Heap, HeapConfig};
//!
//! let arena = ArenaBreak::with_capacity(256 * 1024).unwrap();
//! let mut heap = Heap::new(arena, HeapConfig::new());
//!
//! unsafe {
//!     let ptr = heap.allocate(100).unwrap().unwrap();
//!     ptr.as_ptr().write_bytes(0x2a, 100);
//!
//!     let ptr = heap.resize(ptr.as_ptr(), 10_000).unwrap().unwrap();
//!     assert_eq!(*ptr.as_ptr(), 0x2a);
//!
//!     heap.release(ptr.as_ptr()).unwrap();
//! }
//!
//! assert!(heap.is_empty());
//! ```
//!
//! ## How It Works
//!
//! Each block carries its metadata in front of the payload:
//!
//! ```text
//!   Single Block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         Payload                │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free: false  │  │  │                          │  │
//!   │  │ next: null/ptr  │  │  │  N bytes, N % 16 == 0    │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │      32 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! - **Allocate**: take the first free block with room for the request plus a
//!   header; grow the break by a fixed increment until one exists; split off
//!   what is left over.
//! - **Release**: mark the block free, merge it with a free successor, then
//!   let a free predecessor absorb it. A free tail goes back to the OS.
//! - **Resize**: shrink in place, or absorb free successors, or grow a tail
//!   block in place, and only then move the data.
//!
//! ## Debugging
//!
//! With `DEBUG_MALLOC` set in the environment, every operation writes one
//! line to stderr, e.g. `malloc(24) = 0x5555555a1020 [32 bytes]`.
//!
//! ## Limitations
//!
//! - **Single-threaded core**: `Heap` needs `&mut`; `LockedHeap` adds a lock
//! - **16 byte alignment**: stricter layouts are refused
//! - **First fit**: no size classes, no best-fit search
//! - **Unix-only**: `Sbrk` requires `libc`
//!
//! ## Safety
//!
//! Headers live in the memory they describe. Writing past the end of a
//! payload corrupts the heap, so every allocating operation is `unsafe`.

pub mod align;
mod block;
mod brk;
mod config;
pub mod debug;
mod error;
pub mod ffi;
mod global;
mod heap;

pub use block::{BlockInfo, HEADER_SIZE};
pub use brk::{ArenaBreak, ProgramBreak, Sbrk};
pub use config::{DEBUG_ENV, DEFAULT_INCREMENT, HeapConfig, MIN_INCREMENT, Toggle};
pub use error::{HeapError, HeapResult};
pub use global::LockedHeap;
pub use heap::{Blocks, Heap};
