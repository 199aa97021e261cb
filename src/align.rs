/// Granularity of every block size handed out by the heap.
///
/// Fixed at 8 bytes on every target so block layouts do not depend on the
/// machine word size.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// Evaluates to `None` when rounding would overflow `usize`.
///
/// # Examples
///
/// ```rust
/// use rheapkeep::align;
///
/// assert_eq!(align!(13usize), Some(16));
/// assert_eq!(align!(16usize), Some(16));
/// assert_eq!(align!(usize::MAX), None);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value as usize)
      .checked_add($crate::align::ALIGNMENT - 1)
      .map(|value| value & !($crate::align::ALIGNMENT - 1))
  };
}
