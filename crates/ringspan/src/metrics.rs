use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters updated on the cold edges of the hot paths.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    bytes_reserved: AtomicU64,
    bytes_committed: AtomicU64,
    bytes_acquired: AtomicU64,
    bytes_skipped: AtomicU64,
    bytes_overwritten: AtomicU64,
    reserve_blocks: AtomicU64,
    acquire_blocks: AtomicU64,
    sequences_begun: AtomicU64,
    sequences_ended: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_bytes_reserved(&self, n: u64) {
        self.bytes_reserved.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_committed(&self, n: u64) {
        self.bytes_committed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_acquired(&self, n: u64) {
        self.bytes_acquired.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_skipped(&self, n: u64) {
        self.bytes_skipped.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_overwritten(&self, n: u64) {
        self.bytes_overwritten.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_reserve_blocks(&self, n: u64) {
        self.reserve_blocks.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_acquire_blocks(&self, n: u64) {
        self.acquire_blocks.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_sequences_begun(&self, n: u64) {
        self.sequences_begun.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_sequences_ended(&self, n: u64) {
        self.sequences_ended.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_reserved: self.bytes_reserved.load(Ordering::Relaxed),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            bytes_acquired: self.bytes_acquired.load(Ordering::Relaxed),
            bytes_skipped: self.bytes_skipped.load(Ordering::Relaxed),
            bytes_overwritten: self.bytes_overwritten.load(Ordering::Relaxed),
            reserve_blocks: self.reserve_blocks.load(Ordering::Relaxed),
            acquire_blocks: self.acquire_blocks.load(Ordering::Relaxed),
            sequences_begun: self.sequences_begun.load(Ordering::Relaxed),
            sequences_ended: self.sequences_ended.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a ring's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bytes_reserved: u64,
    pub bytes_committed: u64,
    pub bytes_acquired: u64,
    pub bytes_skipped: u64,
    pub bytes_overwritten: u64,
    pub reserve_blocks: u64,
    pub acquire_blocks: u64,
    pub sequences_begun: u64,
    pub sequences_ended: u64,
}
