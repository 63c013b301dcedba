//! Sequences: logical streams within a ring.
//!
//! A sequence carries a name, a 64-bit time tag, an opaque header blob, and a
//! byte range in ring coordinates. The writer produces exactly one sequence
//! at a time through [`WriteSequence`]; readers attach to sequences through
//! [`ReadSequence`], independently of one another.

use crate::error::{Result, RingError};
use crate::ring::{Ring, SequenceQuery};
use crate::span::{ReadSpan, WriteSpan};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cap on header blobs. Headers describe a stream (typically a small JSON
/// document), not its payload.
pub const MAX_HEADER_SIZE: usize = 65536;

const END_OPEN: u64 = u64::MAX;

/// Shared, mostly-immutable description of one sequence.
#[derive(Debug)]
pub(crate) struct SequenceRecord {
    name: String,
    time_tag: u64,
    header: Box<[u8]>,
    nringlet: u64,
    begin: u64,
    /// One past the last frame, in ring offsets; `END_OPEN` while writing.
    end: AtomicU64,
}

impl SequenceRecord {
    pub(crate) fn new(
        name: String,
        time_tag: u64,
        header: Vec<u8>,
        nringlet: u64,
        begin: u64,
    ) -> Self {
        Self {
            name,
            time_tag,
            header: header.into_boxed_slice(),
            nringlet,
            begin,
            end: AtomicU64::new(END_OPEN),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn time_tag(&self) -> u64 {
        self.time_tag
    }

    pub(crate) fn header(&self) -> &[u8] {
        &self.header
    }

    pub(crate) fn nringlet(&self) -> u64 {
        self.nringlet
    }

    pub(crate) fn begin(&self) -> u64 {
        self.begin
    }

    /// Meaningful only after [`SequenceRecord::is_closed`] reports true.
    pub(crate) fn end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.end.load(Ordering::Acquire) != END_OPEN
    }

    pub(crate) fn close(&self, end: u64) {
        self.end.store(end, Ordering::Release);
    }
}

/// Scoped writer handle returned by [`Ring::begin_writing`].
///
/// Dropping the writer ends writing on the ring, waking every blocked reader.
pub struct RingWriter {
    ring: Ring,
    ended: bool,
}

impl RingWriter {
    pub(crate) fn new(ring: Ring) -> Self {
        Self { ring, ended: false }
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    /// Starts the next sequence. At most one sequence may be in the writing
    /// state; its ringlet count is the ring's.
    pub fn begin_sequence(
        &self,
        name: &str,
        time_tag: u64,
        header: &[u8],
    ) -> Result<WriteSequence> {
        let record = self.ring.begin_sequence(name, time_tag, header)?;
        Ok(WriteSequence {
            ring: self.ring.clone(),
            record,
            ended: false,
        })
    }

    /// Ends writing explicitly; equivalent to dropping the writer but lets
    /// the caller observe errors.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        self.ring.end_writing()
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.ring.end_writing();
        }
    }
}

/// The sequence currently being produced.
///
/// Dropping an unended sequence closes it at the committed frontier.
pub struct WriteSequence {
    ring: Ring,
    record: Arc<SequenceRecord>,
    ended: bool,
}

impl WriteSequence {
    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn time_tag(&self) -> u64 {
        self.record.time_tag()
    }

    pub fn header(&self) -> &[u8] {
        self.record.header()
    }

    pub fn nringlet(&self) -> u64 {
        self.record.nringlet()
    }

    /// Reserves `nbytes` contiguous bytes per ringlet. Blocks while the ring
    /// is full against the slowest guaranteed reader unless `nonblocking`,
    /// in which case it fails with [`RingError::WouldBlock`].
    pub fn reserve(&mut self, nbytes: u64, nonblocking: bool) -> Result<WriteSpan<'_>> {
        if self.ended {
            return Err(RingError::Closed);
        }
        let geometry = self.ring.reserve_span(&self.record, nbytes, nonblocking)?;
        Ok(WriteSpan::new(self.ring.clone(), geometry))
    }

    /// Marks the sequence closed. Readers blocked past its extent wake with
    /// end-of-data; `next()` on a preceding sequence can now advance here.
    pub fn end(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.ring.end_sequence(&self.record)
    }
}

impl Drop for WriteSequence {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

impl std::fmt::Debug for WriteSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSequence")
            .field("name", &self.record.name())
            .field("time_tag", &self.record.time_tag())
            .field("ended", &self.ended)
            .finish()
    }
}

/// Pure function over header bytes, applied before readers see the header.
/// Returning `None` is an error surfaced at open/advance time.
pub type HeaderTransform = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

fn apply_transform(transform: Option<&HeaderTransform>, header: &[u8]) -> Result<Option<Vec<u8>>> {
    match transform {
        None => Ok(None),
        Some(f) => f(header)
            .map(Some)
            .ok_or(RingError::InvalidArgument("header transform returned nothing")),
    }
}

/// Reader-side decoration of a ring that rewrites sequence headers before
/// readers see them. Transforms compose left-to-right: the transform added
/// first runs first. The ring itself stays oblivious to header contents.
pub struct RingView {
    ring: Ring,
    transform: Option<HeaderTransform>,
}

impl RingView {
    pub fn new(ring: Ring) -> Self {
        Self {
            ring,
            transform: None,
        }
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    /// Appends a transform to the composition.
    pub fn with_transform<F>(self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let transform: HeaderTransform = match self.transform {
            None => Arc::new(f),
            Some(prev) => Arc::new(move |header: &[u8]| prev(header).and_then(|mid| f(&mid))),
        };
        Self {
            ring: self.ring,
            transform: Some(transform),
        }
    }

    pub fn open_sequence(&self, name: &str, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(
            self.ring.clone(),
            SequenceQuery::ByName(name.to_string()),
            guarantee,
            self.transform.clone(),
        )
    }

    pub fn open_sequence_at(&self, time_tag: u64, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(
            self.ring.clone(),
            SequenceQuery::At(time_tag),
            guarantee,
            self.transform.clone(),
        )
    }

    pub fn open_latest_sequence(&self, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(
            self.ring.clone(),
            SequenceQuery::Latest,
            guarantee,
            self.transform.clone(),
        )
    }

    pub fn open_earliest_sequence(&self, guarantee: bool) -> Result<ReadSequence> {
        ReadSequence::open(
            self.ring.clone(),
            SequenceQuery::Earliest,
            guarantee,
            self.transform.clone(),
        )
    }
}

/// A reader's attachment to a sequence.
///
/// Guaranteed readers participate in the ring's tail computation and are
/// never overwritten; best-effort readers never hold the writer back and
/// detect stomping through their spans. Dropping the attachment releases the
/// reader's cursor.
pub struct ReadSequence {
    ring: Ring,
    record: Arc<SequenceRecord>,
    reader: u64,
    guaranteed: bool,
    transform: Option<HeaderTransform>,
    header_view: Option<Vec<u8>>,
}

impl ReadSequence {
    pub(crate) fn open(
        ring: Ring,
        query: SequenceQuery,
        guaranteed: bool,
        transform: Option<HeaderTransform>,
    ) -> Result<Self> {
        let (record, reader) = ring.open_reader(&query, guaranteed)?;
        let header_view = match apply_transform(transform.as_ref(), record.header()) {
            Ok(view) => view,
            Err(err) => {
                ring.unregister_reader(reader);
                return Err(err);
            }
        };
        Ok(Self {
            ring,
            record,
            reader,
            guaranteed,
            transform,
            header_view,
        })
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn time_tag(&self) -> u64 {
        self.record.time_tag()
    }

    pub fn nringlet(&self) -> u64 {
        self.record.nringlet()
    }

    pub fn is_guaranteed(&self) -> bool {
        self.guaranteed
    }

    /// Header bytes, after any view transform.
    pub fn header(&self) -> &[u8] {
        self.header_view
            .as_deref()
            .unwrap_or_else(|| self.record.header())
    }

    /// Acquires the window `[offset, offset + nbytes)` of this sequence,
    /// blocking until the writer has produced it or the sequence closes.
    pub fn acquire(&mut self, offset: u64, nbytes: u64) -> Result<ReadSpan<'_>> {
        let info = self.ring.acquire_span(self.reader, &self.record, offset, nbytes)?;
        Ok(ReadSpan::new(
            self.ring.clone(),
            self.reader,
            info,
            info.begin - self.record.begin(),
            offset,
        ))
    }

    /// Advances to the chronologically next sequence in the ring, blocking
    /// until it appears. [`RingError::EndOfData`] once writing has ended and
    /// nothing follows.
    pub fn next(&mut self) -> Result<()> {
        let next = self.ring.next_sequence(self.reader, &self.record)?;
        self.header_view = apply_transform(self.transform.as_ref(), next.header())?;
        self.record = next;
        Ok(())
    }

    /// Explicit close; equivalent to dropping.
    pub fn close(self) {}

    /// Iterates successive spans of `span_size` bytes at the given stride
    /// (default: `span_size`), starting at `begin`, until end of data.
    pub fn read(&mut self, span_size: u64, stride: Option<u64>, begin: u64) -> SpanReader<'_> {
        SpanReader {
            stride: stride.unwrap_or(span_size),
            seq: self,
            span_size,
            offset: begin,
        }
    }
}

impl Drop for ReadSequence {
    fn drop(&mut self) {
        self.ring.unregister_reader(self.reader);
    }
}

impl std::fmt::Debug for ReadSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSequence")
            .field("name", &self.record.name())
            .field("time_tag", &self.record.time_tag())
            .field("guaranteed", &self.guaranteed)
            .finish()
    }
}

/// Lending iterator over successive read spans of one sequence.
pub struct SpanReader<'seq> {
    seq: &'seq mut ReadSequence,
    span_size: u64,
    stride: u64,
    offset: u64,
}

impl SpanReader<'_> {
    /// Acquires the next span; `Ok(None)` signals end of data.
    pub fn next_span(&mut self) -> Result<Option<ReadSpan<'_>>> {
        let offset = self.offset;
        self.offset += self.stride;
        match self.seq.acquire(offset, self.span_size) {
            Ok(span) => Ok(Some(span)),
            Err(RingError::EndOfData) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
