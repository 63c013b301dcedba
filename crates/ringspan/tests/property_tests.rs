//! Property-based tests over the ring's quantified invariants.
//!
//! Coverage:
//! - Window bound: `tail <= head` and `head - tail <= total_span` at all times
//! - Commit accounting: head advances by exactly the committed size
//! - Round-trip: committed bytes are byte-identical for guaranteed readers,
//!   independent of the writer's and reader's gulp sizes
//! - Sequence ordering: `next()` visits sequences in begin order
//! - Snap-forward accounting for lapped best-effort readers

use proptest::prelude::*;
use ringspan_rs::{MemorySpace, Ring, RingError};
use std::sync::atomic::{AtomicUsize, Ordering};

fn unique_ring(prefix: &str) -> Ring {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    Ring::create(&format!("{prefix}-{id}"), MemorySpace::Host).unwrap()
}

// =============================================================================
// Window bound & commit accounting
// =============================================================================

proptest! {
    /// With no guaranteed readers the writer free-runs, but the live window
    /// never exceeds the total span and the head advances by exactly the
    /// committed size (residual slack returns to the pool).
    #[test]
    fn prop_window_stays_bounded(
        ops in prop::collection::vec((1u64..=256, 0u64..=256), 1..40),
    ) {
        let ring = unique_ring("prop-window");
        ring.resize(256, Some(1024), 1).unwrap();
        let writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("s", 0, b"{}").unwrap();

        let mut last_head = 0u64;
        for (reserve, commit) in ops {
            let commit = commit.min(reserve);
            let span = seq.reserve(reserve, false).unwrap();
            span.commit(commit).unwrap();

            let head = ring.head();
            let tail = ring.tail();
            prop_assert!(head >= last_head, "head moved backwards");
            prop_assert!(tail <= head, "tail passed head");
            prop_assert!(head - tail <= 1024, "window exceeded total span");
            prop_assert_eq!(head, last_head + commit);
            last_head = head;
        }
    }
}

// =============================================================================
// Round-trip through arbitrary gulp sizes
// =============================================================================

proptest! {
    /// Bytes committed by the writer are byte-identical to the bytes any
    /// guaranteed reader observes, for any (writer gulp, reader gulp) pair.
    #[test]
    fn prop_round_trip_any_gulp_sizes(
        data in prop::collection::vec(any::<u8>(), 1..2048),
        write_chunk in 1usize..=256,
        read_chunk in 1u64..=256,
    ) {
        let ring = unique_ring("prop-roundtrip");
        ring.resize(256, Some(4096), 1).unwrap();
        let writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("s", 0, b"{}").unwrap();

        let mut written = 0;
        while written < data.len() {
            let chunk = write_chunk.min(data.len() - written);
            let mut span = seq.reserve(chunk as u64, false).unwrap();
            span.as_mut_slice().copy_from_slice(&data[written..written + chunk]);
            span.commit(chunk as u64).unwrap();
            written += chunk;
        }
        seq.end().unwrap();
        writer.end().unwrap();

        let mut reader = ring.open_earliest_sequence(true).unwrap();
        let mut out = Vec::with_capacity(data.len());
        let mut offset = 0u64;
        loop {
            match reader.acquire(offset, read_chunk) {
                Ok(span) => {
                    prop_assert_eq!(span.nbytes_skipped(), 0);
                    prop_assert_eq!(span.nbytes_overwritten(), 0);
                    out.extend_from_slice(span.as_slice());
                    offset += span.size();
                }
                Err(RingError::EndOfData) => break,
                Err(err) => prop_assert!(false, "unexpected acquire error: {err}"),
            }
        }
        prop_assert_eq!(out, data);
    }
}

// =============================================================================
// Sequence ordering
// =============================================================================

proptest! {
    /// Sequences are totally ordered: a reader starting at the earliest
    /// sequence visits every live sequence in nondecreasing tag order.
    #[test]
    fn prop_next_visits_sequences_in_order(
        count in 1usize..6,
        base_tag in 0u64..1_000_000,
    ) {
        let ring = unique_ring("prop-order");
        ring.resize(64, Some(1024), 1).unwrap();
        let writer = ring.begin_writing().unwrap();
        let mut expected = Vec::with_capacity(count);
        for i in 0..count {
            let tag = base_tag + 10 * i as u64;
            let mut seq = writer.begin_sequence(&format!("s{i}"), tag, b"{}").unwrap();
            let span = seq.reserve(64, false).unwrap();
            span.commit(64).unwrap();
            seq.end().unwrap();
            expected.push(tag);
        }
        writer.end().unwrap();

        let mut reader = ring.open_earliest_sequence(true).unwrap();
        let mut seen = vec![reader.time_tag()];
        while reader.next().is_ok() {
            seen.push(reader.time_tag());
        }
        prop_assert_eq!(seen, expected);
    }
}

// =============================================================================
// Snap-forward accounting for lapped best-effort readers
// =============================================================================

proptest! {
    /// When a best-effort reader's requested window has partly scrolled out,
    /// the effective window starts at the tail and the skip is exact.
    #[test]
    fn prop_lapped_acquire_accounting(
        laps in 2u64..6,
        req_seed in any::<u64>(),
    ) {
        const SPAN: u64 = 512;
        let ring = unique_ring("prop-lapped");
        ring.resize(SPAN, Some(SPAN), 1).unwrap();
        let writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("s", 0, b"{}").unwrap();
        for lap in 0..laps {
            let mut span = seq.reserve(SPAN, false).unwrap();
            span.as_mut_slice().fill(lap as u8);
            span.commit(SPAN).unwrap();
        }
        let head = ring.head();
        let tail = ring.tail();
        prop_assert_eq!(head, laps * SPAN);
        prop_assert_eq!(tail, (laps - 1) * SPAN);

        // Keep the request satisfiable without blocking: the writer is idle.
        let nbytes = 256u64;
        let req = req_seed % (head - nbytes + 1);
        let mut reader = ring.open_earliest_sequence(false).unwrap();
        let span = reader.acquire(req, nbytes).unwrap();

        let expected_eff = req.max(tail);
        let expected_size = nbytes.min(head - expected_eff);
        prop_assert_eq!(span.offset(), expected_eff);
        prop_assert_eq!(span.size(), expected_size);
        prop_assert_eq!(span.nbytes_skipped(), (expected_eff - req).min(nbytes));
        prop_assert_eq!(span.requested_offset(), req);
    }
}
