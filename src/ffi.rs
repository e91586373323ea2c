//! C entry points over one process-wide heap on the real program break.
//!
//! By default they are exported as `rm_malloc`, `rm_calloc`, `rm_realloc`
//! and `rm_free`. With the `interpose` feature they take the libc names
//! instead, so the cdylib can be `LD_PRELOAD`ed.

use std::ptr::NonNull;

use libc::{c_int, c_void, size_t};

use crate::{
  brk::Sbrk,
  debug,
  error::{HeapError, HeapResult},
  global::LockedHeap,
};

static HEAP: LockedHeap<Sbrk> = LockedHeap::sbrk();

fn set_errno(err: &HeapError) {
  if !err.is_out_of_memory() {
    return;
  }

  #[cfg(target_os = "linux")]
  unsafe {
    *libc::__errno_location() = libc::ENOMEM;
  }
  #[cfg(target_os = "macos")]
  unsafe {
    *libc::__error() = libc::ENOMEM;
  }
}

fn into_raw(result: HeapResult<Option<NonNull<u8>>>) -> *mut c_void {
  match result {
    Ok(Some(ptr)) => ptr.as_ptr() as *mut c_void,
    Ok(None) => std::ptr::null_mut(),
    Err(err) => {
      set_errno(&err);
      std::ptr::null_mut()
    }
  }
}

#[cfg_attr(feature = "interpose", unsafe(export_name = "malloc"))]
#[cfg_attr(not(feature = "interpose"), unsafe(no_mangle))]
pub unsafe extern "C" fn rm_malloc(size: size_t) -> *mut c_void {
  into_raw(unsafe { HEAP.lock().allocate(size) })
}

#[cfg_attr(feature = "interpose", unsafe(export_name = "calloc"))]
#[cfg_attr(not(feature = "interpose"), unsafe(no_mangle))]
pub unsafe extern "C" fn rm_calloc(
  count: size_t,
  size: size_t,
) -> *mut c_void {
  into_raw(unsafe { HEAP.lock().allocate_zeroed(count, size) })
}

#[cfg_attr(feature = "interpose", unsafe(export_name = "realloc"))]
#[cfg_attr(not(feature = "interpose"), unsafe(no_mangle))]
pub unsafe extern "C" fn rm_realloc(
  ptr: *mut c_void,
  size: size_t,
) -> *mut c_void {
  into_raw(unsafe { HEAP.lock().resize(ptr as *mut u8, size) })
}

/// Unknown pointers and double frees are ignored.
#[cfg_attr(feature = "interpose", unsafe(export_name = "free"))]
#[cfg_attr(not(feature = "interpose"), unsafe(no_mangle))]
pub unsafe extern "C" fn rm_free(ptr: *mut c_void) {
  let _ = unsafe { HEAP.lock().release(ptr as *mut u8) };
}

/// Returns 0 when [`debug::self_test`] passes, 1 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn rm_selftest() -> c_int {
  match debug::self_test() {
    Ok(()) => 0,
    Err(_) => 1,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(target_os = "linux")]
  #[test]
  fn test_errno_is_only_set_for_out_of_memory() {
    unsafe {
      *libc::__errno_location() = 0;
    }
    assert!(into_raw(Err(HeapError::UnmanagedPointer(0x10))).is_null());
    assert_eq!(unsafe { *libc::__errno_location() }, 0);

    assert!(into_raw(Err(HeapError::Overflow { count: 2, size: usize::MAX })).is_null());
    assert_eq!(unsafe { *libc::__errno_location() }, libc::ENOMEM);
  }

  #[test]
  fn test_exports_share_the_break_with_other_users() {
    const SIZE: usize = 40_000;

    unsafe {
      let mut live = Vec::new();
      for round in 1..=8u8 {
        let ptr = rm_malloc(SIZE) as *mut u8;
        assert!(!ptr.is_null(), "rm_malloc failed in round {}", round);
        ptr.write_bytes(round, SIZE);
        live.push((ptr, round));

        // Someone else takes an odd amount right above the heap.
        assert_ne!(libc::sbrk(20_008), usize::MAX as *mut c_void);
      }
      HEAP.lock().check().unwrap();

      let zeroed = rm_calloc(100, 100) as *mut u8;
      assert!(!zeroed.is_null());
      assert!(std::slice::from_raw_parts(zeroed, 10_000).iter().all(|&b| b == 0));
      rm_free(zeroed as *mut c_void);

      let grown = rm_realloc(live[0].0 as *mut c_void, 3 * SIZE) as *mut u8;
      assert!(!grown.is_null());
      live[0].0 = grown;

      for &(ptr, round) in &live {
        assert!(std::slice::from_raw_parts(ptr, SIZE).iter().all(|&b| b == round));
      }

      for (ptr, _) in live {
        rm_free(ptr as *mut c_void);
      }
      HEAP.lock().check().unwrap();
    }
  }

  #[test]
  fn test_selftest_entry_point() {
    assert_eq!(rm_selftest(), 0);
  }
}
