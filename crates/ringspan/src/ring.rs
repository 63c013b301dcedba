//! The ring: a named, bounded, append-only FIFO of sequences.
//!
//! One writer, many readers. All byte positions are monotonically increasing
//! u64 offsets; the buffer index is `offset % total_span` (plus the ringlet
//! row base), so wrap-around never touches offset arithmetic and the ABA
//! problem cannot arise.
//!
//! # Synchronization strategy
//!
//! Writer/reader arbitration (cursor table, sequence list, tail advance) is
//! guarded by one mutex with two condvars: `space_avail` wakes a writer
//! blocked against the slowest guaranteed reader, `data_avail` wakes readers
//! blocked on data or sequence discovery. Blocking paths re-check under a
//! bounded spin before parking (see `RingInner::wait_step`). `head` and
//! `tail` are mirrored into cache-padded atomics (published with Release
//! under the lock) so introspection never contends with the hot paths.
//!
//! Buffer bytes themselves are unsynchronized: the window invariant
//! `reserve_head - tail <= total_span` keeps a live reservation from ever
//! overlapping a guaranteed reader's span, and best-effort readers accept
//! torn data and detect it through their overwritten counter.

use crate::config::RingLayout;
use crate::error::{Result, RingError};
use crate::invariants::{
    debug_assert_commit_bounded, debug_assert_monotonic, debug_assert_seq_adjacent,
    debug_assert_window,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::sequence::{ReadSequence, RingWriter, SequenceRecord, MAX_HEADER_SIZE};
use crate::space::{Buffer, MemorySpace};
use crossbeam_utils::CachePadded;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

/// How a reader names the sequence it wants to attach to.
#[derive(Debug, Clone)]
pub(crate) enum SequenceQuery {
    ByName(String),
    At(u64),
    Latest,
    Earliest,
}

#[derive(Debug, Clone, Copy)]
struct OpenWrite {
    begin: u64,
    reserved: u64,
}

#[derive(Debug, Clone, Copy)]
struct OpenRead {
    begin: u64,
    size: u64,
    overwritten: u64,
}

#[derive(Debug)]
struct ReaderState {
    guaranteed: bool,
    /// Oldest offset this reader still needs. Guaranteed cursors hold the
    /// tail back; best-effort cursors are bookkeeping only.
    cursor: u64,
    span: Option<OpenRead>,
}

#[derive(Debug)]
struct RingState {
    buf: Option<Buffer>,
    layout: Option<RingLayout>,
    /// Committed frontier.
    head: u64,
    /// Reservation frontier; equals `head` whenever no write span is open.
    reserve_head: u64,
    /// Oldest byte still inside the window.
    tail: u64,
    writing_begun: bool,
    writing_ended: bool,
    /// Live sequences, totally ordered by begin offset.
    sequences: VecDeque<Arc<SequenceRecord>>,
    write_seq: Option<Arc<SequenceRecord>>,
    open_write: Option<OpenWrite>,
    readers: HashMap<u64, ReaderState>,
    next_reader: u64,
    open_read_spans: usize,
    /// Time tag of the first sequence ever begun; distinguishes "expired"
    /// from "never existed" once sequences retire.
    first_time_tag: Option<u64>,
    core: Option<usize>,
}

impl RingState {
    fn new() -> Self {
        Self {
            buf: None,
            layout: None,
            head: 0,
            reserve_head: 0,
            tail: 0,
            writing_begun: false,
            writing_ended: false,
            sequences: VecDeque::new(),
            write_seq: None,
            open_write: None,
            readers: HashMap::new(),
            next_reader: 0,
            open_read_spans: 0,
            first_time_tag: None,
            core: None,
        }
    }

    fn min_guaranteed_cursor(&self) -> u64 {
        self.readers
            .values()
            .filter(|r| r.guaranteed)
            .map(|r| r.cursor)
            .min()
            .unwrap_or(u64::MAX)
    }

    fn any_span_open(&self) -> bool {
        self.open_write.is_some() || self.open_read_spans > 0
    }
}

pub(crate) struct RingInner {
    name: String,
    space: MemorySpace,
    state: Mutex<RingState>,
    /// Signalled when the writer may make progress (release, reader exit,
    /// resize, end of writing).
    space_avail: Condvar,
    /// Signalled when readers may make progress (commit, sequence begin/end,
    /// end of writing).
    data_avail: Condvar,
    head_cache: CachePadded<AtomicU64>,
    tail_cache: CachePadded<AtomicU64>,
    metrics: Metrics,
}

impl RingInner {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One step of a blocking wait, counted by `attempt`.
    ///
    /// A commit or a release holds the lock only briefly, so the first few
    /// re-checks drop the lock and spin with PAUSE hints instead of paying a
    /// futex round-trip; after that the waiter parks on `condvar` until the
    /// other side notifies.
    fn wait_step<'a>(
        &'a self,
        condvar: &Condvar,
        guard: MutexGuard<'a, RingState>,
        attempt: &mut u32,
    ) -> MutexGuard<'a, RingState> {
        const SPIN_RECHECKS: u32 = 8;
        const SPIN_SHIFT_MAX: u32 = 6; // 2^6 = 64 PAUSEs at most per re-check
        if *attempt < SPIN_RECHECKS {
            drop(guard);
            for _ in 0..(1u32 << (*attempt).min(SPIN_SHIFT_MAX)) {
                hint::spin_loop();
            }
            *attempt += 1;
            self.lock()
        } else {
            condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Moves the tail forward, charging overwritten bytes to any in-flight
    /// best-effort span the move runs over and retiring sequences that have
    /// fully scrolled out. Callers must have checked the guaranteed cursors.
    fn advance_tail(&self, state: &mut RingState, new_tail: u64) {
        debug_assert_monotonic!("tail", state.tail, new_tail);
        let old_tail = state.tail;
        let mut stomped = 0;
        for reader in state.readers.values_mut() {
            if let Some(span) = reader.span.as_mut() {
                let lo = span.begin.max(old_tail);
                let hi = (span.begin + span.size).min(new_tail);
                if hi > lo {
                    span.overwritten += hi - lo;
                    stomped += hi - lo;
                }
            }
        }
        if stomped > 0 {
            self.metrics.add_bytes_overwritten(stomped);
        }
        state.tail = new_tail;
        self.tail_cache.store(new_tail, Ordering::Release);
        while let Some(front) = state.sequences.front() {
            if front.is_closed() && front.end() <= new_tail {
                state.sequences.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Drop for RingInner {
    fn drop(&mut self) {
        lock_names().remove(&self.name);
    }
}

fn names() -> &'static Mutex<HashSet<String>> {
    static NAMES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(HashSet::new()))
}

fn lock_names() -> MutexGuard<'static, HashSet<String>> {
    names().lock().unwrap_or_else(PoisonError::into_inner)
}

/// Strips a name down to filesystem-friendly characters.
pub(crate) fn slugify(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')' | ' '))
        .collect()
}

/// Geometry handed to a write span: base pointer of the reserved window plus
/// the ringlet row stride.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpanGeometry {
    pub ptr: *mut u8,
    pub size: u64,
    pub stride: u64,
    pub nringlet: u64,
}

/// Result of acquiring a read span: the effective window after any
/// snap-forward, plus its placement in the buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AcquireInfo {
    pub ptr: *const u8,
    /// Effective begin, in ring offsets.
    pub begin: u64,
    pub size: u64,
    pub skipped: u64,
    pub stride: u64,
    pub nringlet: u64,
}

/// A named, bounded, append-only FIFO of sequences with one writer and many
/// concurrent readers.
///
/// `Ring` is a cheap handle; clones share the same underlying ring.
pub struct Ring {
    inner: Arc<RingInner>,
}

impl Clone for Ring {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("name", &self.inner.name)
            .field("space", &self.inner.space)
            .field("head", &self.head())
            .field("tail", &self.tail())
            .finish()
    }
}

impl Ring {
    /// Creates a ring. The name is slug-sanitized and must be unique within
    /// the process; no buffer is allocated until [`Ring::resize`].
    pub fn create(name: &str, space: MemorySpace) -> Result<Ring> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(RingError::InvalidArgument(
                "ring name is empty after sanitizing",
            ));
        }
        if !lock_names().insert(slug.clone()) {
            return Err(RingError::InvalidArgument("ring name already in use"));
        }
        log::debug!("ring '{slug}': created in {space}");
        Ok(Ring {
            inner: Arc::new(RingInner {
                name: slug,
                space,
                state: Mutex::new(RingState::new()),
                space_avail: Condvar::new(),
                data_avail: Condvar::new(),
                head_cache: CachePadded::new(AtomicU64::new(0)),
                tail_cache: CachePadded::new(AtomicU64::new(0)),
                metrics: Metrics::new(),
            }),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn space(&self) -> MemorySpace {
        self.inner.space
    }

    /// Committed frontier, in ring offsets.
    #[inline]
    pub fn head(&self) -> u64 {
        self.inner.head_cache.load(Ordering::Acquire)
    }

    /// Oldest byte still inside the window, in ring offsets.
    #[inline]
    pub fn tail(&self) -> u64 {
        self.inner.tail_cache.load(Ordering::Acquire)
    }

    /// Current buffer layout, if the ring has been sized.
    pub fn layout(&self) -> Option<RingLayout> {
        self.inner.lock().layout
    }

    /// CPU core hint for stages attached to this ring.
    pub fn core(&self) -> Option<usize> {
        self.inner.lock().core
    }

    /// Records a CPU core hint.
    pub fn set_core(&self, core: Option<usize>) {
        self.inner.lock().core = core;
    }

    /// Point-in-time counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// (Re)configures the backing buffer.
    ///
    /// `total_span` defaults to `contiguous_span * 4`. Fails with
    /// [`RingError::RingBusy`] while any span is open, and with
    /// [`RingError::InvalidArgument`] for a gulp larger than the buffer, a
    /// ringlet-count change while sequences are live, or a shrink below the
    /// live window. Growth relocates the live window into the new buffer.
    pub fn resize(
        &self,
        contiguous_span: u64,
        total_span: Option<u64>,
        nringlet: u64,
    ) -> Result<()> {
        let layout = RingLayout::new(contiguous_span, total_span, nringlet)?;
        let mut state = self.inner.lock();
        if state.any_span_open() {
            return Err(RingError::RingBusy);
        }
        if let Some(old) = state.layout {
            if old == layout {
                return Ok(());
            }
            let live = !state.sequences.is_empty() || state.write_seq.is_some();
            if live && nringlet != old.nringlet() {
                return Err(RingError::InvalidArgument(
                    "cannot change ringlet count while sequences are live",
                ));
            }
            if state.reserve_head - state.tail > layout.total_span() {
                return Err(RingError::InvalidArgument(
                    "live data exceeds the new total span",
                ));
            }
        }
        let new_buf = Buffer::new(layout.buffer_size(), self.inner.space)?;
        if let (Some(old_layout), Some(old_buf)) = (state.layout, state.buf.as_ref()) {
            relocate(old_buf, old_layout, &new_buf, layout, state.tail, state.head);
        }
        log::debug!(
            "ring '{}': resized to {} bytes x {} ringlets",
            self.inner.name,
            layout.total_span(),
            layout.nringlet()
        );
        state.buf = Some(new_buf);
        state.layout = Some(layout);
        drop(state);
        // A larger window may unblock a waiting writer.
        self.inner.space_avail.notify_all();
        Ok(())
    }

    /// Opens the ring for writing. A ring may be opened at most once per
    /// lifetime; the returned guard ends writing when dropped.
    pub fn begin_writing(&self) -> Result<RingWriter> {
        let mut state = self.inner.lock();
        if state.writing_begun {
            return Err(RingError::InvalidArgument(
                "ring was already opened for writing",
            ));
        }
        state.writing_begun = true;
        drop(state);
        log::debug!("ring '{}': writing begun", self.inner.name);
        Ok(RingWriter::new(self.clone()))
    }

    /// Ends writing: no new sequences may start, and every blocked reader and
    /// writer is woken. Idempotent. A sequence still open is closed at the
    /// committed frontier so readers terminate instead of waiting forever.
    pub fn end_writing(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.writing_ended {
            return Ok(());
        }
        if let Some(seq) = state.write_seq.take() {
            seq.close(state.head);
            self.inner.metrics.add_sequences_ended(1);
        }
        state.writing_ended = true;
        drop(state);
        log::debug!("ring '{}': writing ended", self.inner.name);
        self.inner.data_avail.notify_all();
        self.inner.space_avail.notify_all();
        Ok(())
    }

    pub fn writing_ended(&self) -> bool {
        self.inner.lock().writing_ended
    }

    /// Opens the sequence with the given name, blocking until it appears or
    /// writing ends.
    pub fn open_sequence(&self, name: &str, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(
            self.clone(),
            SequenceQuery::ByName(name.to_string()),
            guarantee,
            None,
        )
    }

    /// Opens the sequence covering `time_tag`: the latest live sequence whose
    /// tag is at or before the request.
    pub fn open_sequence_at(&self, time_tag: u64, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(self.clone(), SequenceQuery::At(time_tag), guarantee, None)
    }

    /// Opens the most recently begun live sequence.
    pub fn open_latest_sequence(&self, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(self.clone(), SequenceQuery::Latest, guarantee, None)
    }

    /// Opens the oldest live sequence still resident.
    pub fn open_earliest_sequence(&self, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(self.clone(), SequenceQuery::Earliest, guarantee, None)
    }

    // ---------------------------------------------------------------------
    // WRITER PROTOCOL (called by RingWriter / WriteSequence / WriteSpan)
    // ---------------------------------------------------------------------

    pub(crate) fn begin_sequence(
        &self,
        name: &str,
        time_tag: u64,
        header: &[u8],
    ) -> Result<Arc<SequenceRecord>> {
        if header.len() > MAX_HEADER_SIZE {
            return Err(RingError::InvalidArgument("header exceeds the size cap"));
        }
        let mut state = self.inner.lock();
        let layout = state
            .layout
            .ok_or(RingError::InvalidArgument("ring has not been sized"))?;
        if !state.writing_begun {
            return Err(RingError::InvalidArgument("ring is not open for writing"));
        }
        if state.writing_ended {
            return Err(RingError::Closed);
        }
        if state.write_seq.is_some() {
            return Err(RingError::InvalidArgument(
                "a sequence is already being written",
            ));
        }
        if let Some(last) = state.sequences.back() {
            if time_tag < last.time_tag() {
                return Err(RingError::InvalidArgument(
                    "time tags must be nondecreasing",
                ));
            }
            debug_assert_seq_adjacent!(last.end(), state.reserve_head);
        }
        let record = Arc::new(SequenceRecord::new(
            name.to_string(),
            time_tag,
            header.to_vec(),
            layout.nringlet(),
            state.reserve_head,
        ));
        if state.first_time_tag.is_none() {
            state.first_time_tag = Some(time_tag);
        }
        state.sequences.push_back(Arc::clone(&record));
        state.write_seq = Some(Arc::clone(&record));
        drop(state);
        self.inner.metrics.add_sequences_begun(1);
        log::debug!(
            "ring '{}': sequence '{}' begun at tag {}",
            self.inner.name,
            record.name(),
            time_tag
        );
        self.inner.data_avail.notify_all();
        Ok(record)
    }

    pub(crate) fn end_sequence(&self, record: &Arc<SequenceRecord>) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(current) = state.write_seq.as_ref() else {
            // Already closed, e.g. by end_writing.
            return Ok(());
        };
        if !Arc::ptr_eq(current, record) {
            return Err(RingError::Internal(
                "ending a sequence that is not being written",
            ));
        }
        if state.open_write.is_some() {
            return Err(RingError::RingBusy);
        }
        record.close(state.reserve_head);
        state.write_seq = None;
        drop(state);
        self.inner.metrics.add_sequences_ended(1);
        log::debug!(
            "ring '{}': sequence '{}' ended",
            self.inner.name,
            record.name()
        );
        self.inner.data_avail.notify_all();
        Ok(())
    }

    /// Reserves `nbytes` contiguous bytes per ringlet in the current write
    /// sequence, blocking while the window is full against the slowest
    /// guaranteed reader.
    pub(crate) fn reserve_span(
        &self,
        record: &Arc<SequenceRecord>,
        nbytes: u64,
        nonblocking: bool,
    ) -> Result<SpanGeometry> {
        if nbytes == 0 {
            return Err(RingError::InvalidArgument("cannot reserve an empty span"));
        }
        let mut state = self.inner.lock();
        let mut attempt = 0u32;
        let mut blocked = false;
        loop {
            match state.write_seq.as_ref() {
                Some(current) if Arc::ptr_eq(current, record) => {}
                _ => return Err(RingError::Closed),
            }
            let layout = state
                .layout
                .ok_or(RingError::Internal("sized ring lost its buffer"))?;
            if nbytes > layout.contiguous_span() {
                return Err(RingError::InvalidArgument(
                    "span exceeds the ring's contiguous span",
                ));
            }
            let begin = state.reserve_head;
            let target_tail = (begin + nbytes).saturating_sub(layout.total_span());
            if target_tail <= state.tail || state.min_guaranteed_cursor() >= target_tail {
                if target_tail > state.tail {
                    self.inner.advance_tail(&mut state, target_tail);
                }
                state.reserve_head = begin + nbytes;
                state.open_write = Some(OpenWrite {
                    begin,
                    reserved: nbytes,
                });
                debug_assert_window!(state.reserve_head, state.tail, layout.total_span());
                let buf = state
                    .buf
                    .as_ref()
                    .ok_or(RingError::Internal("sized ring lost its buffer"))?;
                // SAFETY: phys(begin) < total_span, and the reserved window
                // extends at most ghost_span bytes past it, inside the row.
                let ptr = unsafe { buf.as_ptr().add(layout.phys(begin) as usize) };
                self.inner.metrics.add_bytes_reserved(nbytes);
                return Ok(SpanGeometry {
                    ptr,
                    size: nbytes,
                    stride: layout.stride(),
                    nringlet: layout.nringlet(),
                });
            }
            if nonblocking {
                return Err(RingError::WouldBlock);
            }
            if !blocked {
                blocked = true;
                self.inner.metrics.add_reserve_blocks(1);
            }
            state = self
                .inner
                .wait_step(&self.inner.space_avail, state, &mut attempt);
        }
    }

    /// Publishes `commit` bytes of the open reservation and returns the
    /// residual slack to the free pool.
    pub(crate) fn commit_span(&self, commit: u64) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(open) = state.open_write else {
            return Err(RingError::Internal("no write span is open"));
        };
        debug_assert_commit_bounded!(commit, open.reserved);
        if commit > open.reserved {
            return Err(RingError::InvalidArgument(
                "commit size exceeds the reservation",
            ));
        }
        state.open_write = None;
        if state.writing_ended {
            // The sequence was already closed at the old frontier; the
            // reservation is abandoned wholesale.
            state.reserve_head = open.begin;
            return if commit == 0 {
                Ok(())
            } else {
                Err(RingError::Closed)
            };
        }
        state.reserve_head = open.begin + commit;
        let new_head = open.begin + commit;
        debug_assert_monotonic!("head", state.head, new_head);
        if commit > 0 {
            if let (Some(layout), Some(buf)) = (state.layout, state.buf.as_ref()) {
                publish_ghost(buf, layout, open.begin, commit);
            }
        }
        state.head = new_head;
        self.inner.head_cache.store(new_head, Ordering::Release);
        drop(state);
        if commit > 0 {
            self.inner.metrics.add_bytes_committed(commit);
        }
        self.inner.data_avail.notify_all();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // READER PROTOCOL (called by ReadSequence / ReadSpan)
    // ---------------------------------------------------------------------

    /// Selects a sequence and registers a reader cursor on it, atomically, so
    /// a guaranteed reader pins the tail from the moment of selection.
    pub(crate) fn open_reader(
        &self,
        query: &SequenceQuery,
        guaranteed: bool,
    ) -> Result<(Arc<SequenceRecord>, u64)> {
        let mut state = self.inner.lock();
        let mut attempt = 0u32;
        loop {
            match select_sequence(&state, query) {
                Selection::Found(record) => {
                    let id = state.next_reader;
                    state.next_reader += 1;
                    let cursor = record.begin().max(state.tail);
                    state.readers.insert(
                        id,
                        ReaderState {
                            guaranteed,
                            cursor,
                            span: None,
                        },
                    );
                    return Ok((record, id));
                }
                Selection::Failed(err) => return Err(err),
                Selection::NotYet => {
                    if state.writing_ended {
                        return Err(match query {
                            SequenceQuery::ByName(_) | SequenceQuery::At(_) => {
                                RingError::NoSuchSequence
                            }
                            SequenceQuery::Latest | SequenceQuery::Earliest => RingError::EndOfData,
                        });
                    }
                    state = self
                        .inner
                        .wait_step(&self.inner.data_avail, state, &mut attempt);
                }
            }
        }
    }

    pub(crate) fn unregister_reader(&self, reader: u64) {
        let mut state = self.inner.lock();
        if let Some(gone) = state.readers.remove(&reader) {
            if gone.span.is_some() {
                state.open_read_spans -= 1;
            }
        }
        drop(state);
        self.inner.space_avail.notify_all();
    }

    /// Advances a reader to the chronologically next sequence, blocking until
    /// it appears or writing ends.
    pub(crate) fn next_sequence(
        &self,
        reader: u64,
        current: &Arc<SequenceRecord>,
    ) -> Result<Arc<SequenceRecord>> {
        let mut state = self.inner.lock();
        let mut attempt = 0u32;
        loop {
            let next = state
                .sequences
                .iter()
                .find(|s| s.begin() > current.begin())
                .cloned();
            if let Some(next) = next {
                let tail = state.tail;
                let Some(entry) = state.readers.get_mut(&reader) else {
                    return Err(RingError::Internal("reader is not registered"));
                };
                if entry.span.is_some() {
                    return Err(RingError::InvalidArgument(
                        "cannot advance with a span still acquired",
                    ));
                }
                entry.cursor = next.begin().max(tail);
                drop(state);
                self.inner.space_avail.notify_all();
                return Ok(next);
            }
            if state.writing_ended {
                return Err(RingError::EndOfData);
            }
            state = self
                .inner
                .wait_step(&self.inner.data_avail, state, &mut attempt);
        }
    }

    /// Acquires a read window, blocking until the writer has produced it or
    /// the sequence closes. Best-effort windows that start below the tail are
    /// snapped forward; the skipped amount is reported in the result.
    pub(crate) fn acquire_span(
        &self,
        reader: u64,
        record: &Arc<SequenceRecord>,
        offset: u64,
        nbytes: u64,
    ) -> Result<AcquireInfo> {
        if nbytes == 0 {
            return Err(RingError::InvalidArgument("cannot acquire an empty span"));
        }
        let target = record
            .begin()
            .checked_add(offset)
            .ok_or(RingError::InvalidArgument("span offset overflows"))?;
        let want_end = target
            .checked_add(nbytes)
            .ok_or(RingError::InvalidArgument("span extent overflows"))?;
        let mut state = self.inner.lock();
        let mut attempt = 0u32;
        let mut blocked = false;
        loop {
            {
                let entry = state
                    .readers
                    .get(&reader)
                    .ok_or(RingError::Internal("reader is not registered"))?;
                if entry.span.is_some() {
                    return Err(RingError::InvalidArgument(
                        "a span is already acquired by this reader",
                    ));
                }
            }
            let layout = state
                .layout
                .ok_or(RingError::Internal("sized ring lost its buffer"))?;
            if nbytes > layout.contiguous_span() {
                return Err(RingError::InvalidArgument(
                    "span exceeds the ring's contiguous span",
                ));
            }
            if state.head >= want_end || record.is_closed() || state.writing_ended {
                break;
            }
            if !blocked {
                blocked = true;
                self.inner.metrics.add_acquire_blocks(1);
            }
            state = self
                .inner
                .wait_step(&self.inner.data_avail, state, &mut attempt);
        }
        let layout = state
            .layout
            .ok_or(RingError::Internal("sized ring lost its buffer"))?;
        let limit = if record.is_closed() {
            record.end().min(state.head)
        } else {
            state.head
        };
        if record.is_closed() && target >= limit {
            return Err(RingError::EndOfData);
        }
        let effective = target.max(state.tail).min(limit);
        let size = nbytes.min(limit - effective);
        if size == 0 {
            // Either the remaining extent of a closed sequence has fully
            // scrolled out, or an open sequence lapped this reader so hard
            // that nothing requested survives.
            return Err(if record.is_closed() {
                RingError::EndOfData
            } else {
                RingError::SequenceExpired
            });
        }
        let skipped = (effective - target).min(nbytes);
        let buf = state
            .buf
            .as_ref()
            .ok_or(RingError::Internal("sized ring lost its buffer"))?;
        refresh_ghost(buf, layout, effective, size);
        // SAFETY: phys(effective) < total_span; the window extends at most
        // ghost_span bytes past it, inside the row.
        let ptr = unsafe { buf.as_ptr().add(layout.phys(effective) as usize) };
        let guaranteed = {
            let Some(entry) = state.readers.get_mut(&reader) else {
                return Err(RingError::Internal("reader is not registered"));
            };
            entry.span = Some(OpenRead {
                begin: effective,
                size,
                overwritten: 0,
            });
            if entry.guaranteed {
                entry.cursor = effective;
            }
            entry.guaranteed
        };
        state.open_read_spans += 1;
        drop(state);
        self.inner.metrics.add_bytes_acquired(size);
        if skipped > 0 {
            self.inner.metrics.add_bytes_skipped(skipped);
        }
        if guaranteed {
            // The cursor may have moved forward; the writer may proceed.
            self.inner.space_avail.notify_all();
        }
        Ok(AcquireInfo {
            ptr,
            begin: effective,
            size,
            skipped,
            stride: layout.stride(),
            nringlet: layout.nringlet(),
        })
    }

    pub(crate) fn release_span(&self, reader: u64) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(entry) = state.readers.get_mut(&reader) else {
            return Err(RingError::Internal("reader is not registered"));
        };
        let Some(span) = entry.span.take() else {
            return Err(RingError::Internal("no span is acquired"));
        };
        if entry.guaranteed {
            entry.cursor = span.begin + span.size;
        }
        state.open_read_spans -= 1;
        drop(state);
        self.inner.space_avail.notify_all();
        Ok(())
    }

    /// Bytes of the reader's in-flight span stomped by the writer since
    /// acquire. Zero when no span is open.
    pub(crate) fn span_overwritten(&self, reader: u64) -> u64 {
        self.inner
            .lock()
            .readers
            .get(&reader)
            .and_then(|r| r.span.as_ref().map(|s| s.overwritten))
            .unwrap_or(0)
    }
}

#[cfg(feature = "affinity")]
impl Ring {
    /// Pins the calling thread to the ring's core hint, if one is set.
    #[cfg(target_os = "linux")]
    pub fn bind_current_thread(&self) -> Result<()> {
        let Some(core) = self.core() else {
            return Ok(());
        };
        // SAFETY: the cpu_set_t is a plain bitmask local to this call;
        // sched_setaffinity only reads it.
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(core % (libc::CPU_SETSIZE as usize), &mut set);
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                return Err(RingError::InvalidArgument(
                    "failed to bind the calling thread to the hinted core",
                ));
            }
        }
        Ok(())
    }

    /// Pinning is Linux-only; elsewhere the hint is advisory.
    #[cfg(not(target_os = "linux"))]
    pub fn bind_current_thread(&self) -> Result<()> {
        Ok(())
    }
}

enum Selection {
    Found(Arc<SequenceRecord>),
    Failed(RingError),
    NotYet,
}

fn select_sequence(state: &RingState, query: &SequenceQuery) -> Selection {
    match query {
        SequenceQuery::ByName(name) => state
            .sequences
            .iter()
            .find(|s| s.name() == name.as_str())
            .cloned()
            .map_or(Selection::NotYet, Selection::Found),
        SequenceQuery::Earliest => state
            .sequences
            .front()
            .cloned()
            .map_or(Selection::NotYet, Selection::Found),
        SequenceQuery::Latest => state
            .sequences
            .back()
            .cloned()
            .map_or(Selection::NotYet, Selection::Found),
        SequenceQuery::At(tag) => {
            if state.sequences.is_empty() {
                return Selection::NotYet;
            }
            let mut best = None;
            for record in &state.sequences {
                if record.time_tag() <= *tag {
                    best = Some(record);
                } else {
                    break;
                }
            }
            match best {
                Some(record) => Selection::Found(Arc::clone(record)),
                None => {
                    // Every live tag is newer than the request: either the
                    // covering sequence scrolled out, or it never existed.
                    if state.first_time_tag.is_some_and(|first| first <= *tag) {
                        Selection::Failed(RingError::SequenceExpired)
                    } else {
                        Selection::Failed(RingError::NoSuchSequence)
                    }
                }
            }
        }
    }
}

/// Copies a committed overhang out of the ghost region back to the canonical
/// row head, for every ringlet.
fn publish_ghost(buf: &Buffer, layout: RingLayout, begin: u64, len: u64) {
    let phys = layout.phys(begin);
    if phys + len <= layout.total_span() {
        return;
    }
    let overhang = phys + len - layout.total_span();
    for ringlet in 0..layout.nringlet() {
        let row = ringlet * layout.stride();
        // SAFETY: overhang <= ghost_span, so both ranges lie inside the row
        // and cannot overlap (ghost region vs. row head).
        unsafe {
            let src = buf.as_ptr().add((row + layout.total_span()) as usize);
            let dst = buf.as_ptr().add(row as usize);
            std::ptr::copy_nonoverlapping(src, dst, overhang as usize);
        }
    }
}

/// Refreshes the ghost region from the canonical row head before a read that
/// extends past the wrap point.
fn refresh_ghost(buf: &Buffer, layout: RingLayout, begin: u64, len: u64) {
    let phys = layout.phys(begin);
    if phys + len <= layout.total_span() {
        return;
    }
    let overhang = phys + len - layout.total_span();
    for ringlet in 0..layout.nringlet() {
        let row = ringlet * layout.stride();
        // SAFETY: overhang <= ghost_span; disjoint ranges inside the row.
        unsafe {
            let src = buf.as_ptr().add(row as usize);
            let dst = buf.as_ptr().add((row + layout.total_span()) as usize);
            std::ptr::copy_nonoverlapping(src, dst, overhang as usize);
        }
    }
}

/// Moves the live window `[tail, head)` from one buffer layout to another,
/// chunked by the contiguity of both mappings. Ringlet counts must match
/// (callers only relocate when sequences are live, which forbids a change).
fn relocate(
    old_buf: &Buffer,
    old_layout: RingLayout,
    new_buf: &Buffer,
    new_layout: RingLayout,
    tail: u64,
    head: u64,
) {
    debug_assert_eq!(old_layout.nringlet(), new_layout.nringlet());
    let mut offset = tail;
    while offset < head {
        let old_phys = old_layout.phys(offset);
        let new_phys = new_layout.phys(offset);
        let chunk = (head - offset)
            .min(old_layout.total_span() - old_phys)
            .min(new_layout.total_span() - new_phys);
        for ringlet in 0..old_layout.nringlet() {
            // SAFETY: both regions are in-bounds row segments of their own
            // allocations, which never overlap each other.
            unsafe {
                let src = old_buf
                    .as_ptr()
                    .add((ringlet * old_layout.stride() + old_phys) as usize);
                let dst = new_buf
                    .as_ptr()
                    .add((ringlet * new_layout.stride() + new_phys) as usize);
                std::ptr::copy_nonoverlapping(src, dst, chunk as usize);
            }
        }
        offset += chunk;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_strips_hostile_characters() {
        assert_eq!(slugify("my ring/0:raw!"), "my ring0raw");
        assert_eq!(slugify("a_b-c.d(e)"), "a_b-c.d(e)");
    }

    #[test]
    fn test_names_are_process_unique() {
        let a = Ring::create("unit-unique", MemorySpace::Host).unwrap();
        assert!(Ring::create("unit-unique", MemorySpace::Host).is_err());
        drop(a);
        // Name is released with the last handle.
        let _b = Ring::create("unit-unique", MemorySpace::Host).unwrap();
    }

    #[test]
    fn test_begin_writing_only_once() {
        let ring = Ring::create("unit-once", MemorySpace::Host).unwrap();
        ring.resize(64, None, 1).unwrap();
        let writer = ring.begin_writing().unwrap();
        assert!(ring.begin_writing().is_err());
        drop(writer);
        assert!(ring.writing_ended());
        assert!(ring.begin_writing().is_err());
    }

    #[test]
    fn test_end_writing_is_idempotent() {
        let ring = Ring::create("unit-idem", MemorySpace::Host).unwrap();
        ring.resize(64, None, 1).unwrap();
        let writer = ring.begin_writing().unwrap();
        writer.end().unwrap();
        assert!(ring.writing_ended());
        ring.end_writing().unwrap();
        assert!(ring.writing_ended());
    }

    #[test]
    fn test_resize_defaults_and_noop() {
        let ring = Ring::create("unit-resize", MemorySpace::Host).unwrap();
        ring.resize(256, None, 1).unwrap();
        let layout = ring.layout().unwrap();
        assert_eq!(layout.total_span(), 1024);
        // Same layout again is a no-op.
        ring.resize(256, Some(1024), 1).unwrap();
    }

    #[test]
    fn test_core_hint_round_trip() {
        let ring = Ring::create("unit-core", MemorySpace::Host).unwrap();
        assert_eq!(ring.core(), None);
        ring.set_core(Some(3));
        assert_eq!(ring.core(), Some(3));
    }
}
