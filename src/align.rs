/// Every size handed out and every payload address is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Rounds the given value up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use rmalloc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Rounds the given value down to a multiple of [`ALIGNMENT`].
///
/// ```rust
/// use rmalloc::align_down;
///
/// assert_eq!(align_down!(15), 0);
/// assert_eq!(align_down!(33), 32);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr) => {
    $value & !($crate::align::ALIGNMENT - 1)
  };
}

pub const fn align_up(n: usize) -> usize {
  align!(n)
}

/// Like [`align_up`], but `None` when the result does not fit in a `usize`.
pub const fn checked_align_up(n: usize) -> Option<usize> {
  match n.checked_add(ALIGNMENT - 1) {
    Some(n) => Some(align_down!(n)),
    None => None,
  }
}
