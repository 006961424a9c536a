//! Monotonic time source.

use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds since an arbitrary process-local epoch.
///
/// Anchored at first use. Never returns 0: that value is reserved as the
/// "not yet stamped" sentinel in the per-thread slots.
#[inline(always)]
pub(crate) fn now_ns() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    (start.elapsed().as_nanos() as u64).max(1)
}
