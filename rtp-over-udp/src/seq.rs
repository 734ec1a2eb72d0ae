//! Sequence-number and window arithmetic shared by both engines.
//!
//! Sequence numbers are plain non-negative integers: `0` for START, `1..=N`
//! for data, `N + 1` for END.  Streams are finite, so no wrap-around
//! comparisons are needed; the helpers saturate instead of wrapping.

use std::collections::BTreeMap;

/// `true` when `base <= seq < base + size`.
#[inline]
pub fn in_window(seq: u32, base: u32, size: u32) -> bool {
    seq >= base && u64::from(seq) < u64::from(base) + u64::from(size)
}

/// Slide `base` forward over every contiguous entry of `buffer`.
///
/// While `buffer` holds `*base`, that entry is removed, handed to `sink`, and
/// `*base` is incremented.  Entries are therefore drained in increasing order
/// and never out of turn.  Returns how many entries were drained.
pub fn advance<V>(base: &mut u32, buffer: &mut BTreeMap<u32, V>, mut sink: impl FnMut(V)) -> usize {
    let mut drained = 0;
    while let Some(value) = buffer.remove(base) {
        sink(value);
        *base = base.saturating_add(1);
        drained += 1;
    }
    drained
}
