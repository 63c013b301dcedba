//! Debug assertion macros for ring offset invariants.
//!
//! Active only in debug builds; release builds pay nothing. All offsets are
//! monotonically increasing u64 byte positions, so plain comparisons suffice.

/// Assert the live window never exceeds the backing span.
///
/// Holds at every point in time: `tail <= head` and `head - tail <= total`.
macro_rules! debug_assert_window {
    ($head:expr, $tail:expr, $total:expr) => {
        debug_assert!(
            $head >= $tail && $head - $tail <= $total,
            "ring window violated: head {} tail {} total span {}",
            $head,
            $tail,
            $total
        )
    };
}

/// Assert that a byte position only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that consecutive sequences tile the ring without gaps.
macro_rules! debug_assert_seq_adjacent {
    ($prev_end:expr, $begin:expr) => {
        debug_assert!(
            $prev_end == $begin,
            "sequence gap: previous ended at {} but next begins at {}",
            $prev_end,
            $begin
        )
    };
}

/// Assert a commit never exceeds its reservation.
macro_rules! debug_assert_commit_bounded {
    ($commit:expr, $reserved:expr) => {
        debug_assert!(
            $commit <= $reserved,
            "commit of {} bytes exceeds reservation of {}",
            $commit,
            $reserved
        )
    };
}

pub(crate) use debug_assert_commit_bounded;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_seq_adjacent;
pub(crate) use debug_assert_window;
