//! Spans: scoped byte windows inside a sequence.
//!
//! A span is the unit of producer and consumer work. Write spans commit,
//! read spans release; both happen automatically at scope exit so an
//! exceptional path never publishes bogus data ([`WriteSpan`] commits zero
//! bytes) or leaks a cursor ([`ReadSpan`] releases).

use crate::array::{ArrayDescriptor, DataType, StridedView, StridedViewMut};
use crate::error::{Result, RingError};
use crate::ring::{AcquireInfo, Ring, SpanGeometry};
use crate::sequence::{ReadSequence, WriteSequence};
use std::marker::PhantomData;

/// Byte-level placement of a span inside its ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanInfo {
    /// Effective offset from the sequence begin, in bytes.
    pub offset: u64,
    /// Bytes per ringlet in the window.
    pub size: u64,
    /// Physical stride between consecutive ringlet rows.
    pub stride: u64,
    pub nringlet: u64,
}

/// A reserved, writable window in the current write sequence.
///
/// The exclusive borrow of the [`WriteSequence`] makes the reservation
/// unique; [`WriteSpan::commit`] publishes up to the reserved size, and an
/// uncommitted span commits zero bytes when dropped.
pub struct WriteSpan<'seq> {
    ring: Ring,
    ptr: *mut u8,
    size: u64,
    stride: u64,
    nringlet: u64,
    committed: bool,
    _seq: PhantomData<&'seq mut WriteSequence>,
}

impl<'seq> WriteSpan<'seq> {
    pub(crate) fn new(ring: Ring, geometry: SpanGeometry) -> Self {
        Self {
            ring,
            ptr: geometry.ptr,
            size: geometry.size,
            stride: geometry.stride,
            nringlet: geometry.nringlet,
            committed: false,
            _seq: PhantomData,
        }
    }

    /// Reserved bytes per ringlet.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn nringlet(&self) -> u64 {
        self.nringlet
    }

    pub fn info(&self) -> SpanInfo {
        SpanInfo {
            offset: 0,
            size: self.size,
            stride: self.stride,
            nringlet: self.nringlet,
        }
    }

    /// Writable bytes of one ringlet row.
    ///
    /// # Panics
    ///
    /// Panics if `ringlet` is out of range.
    pub fn ringlet_mut(&mut self, ringlet: u64) -> &mut [u8] {
        assert!(ringlet < self.nringlet, "ringlet index out of range");
        // SAFETY: the reservation grants this span exclusive access to
        // [ptr + ringlet*stride, +size) for every ringlet row until commit.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.ptr.add((ringlet * self.stride) as usize),
                self.size as usize,
            )
        }
    }

    /// Writable bytes of the first ringlet row; the whole window when
    /// `nringlet == 1`.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.ringlet_mut(0)
    }

    /// Typed `nringlet x n` view over the window. The element size must
    /// divide the span size and the span must be aligned for `T`.
    pub fn view_mut<T: Copy>(&mut self) -> Result<StridedViewMut<'_, T>> {
        StridedViewMut::from_raw(self.ptr.cast::<T>(), self.nringlet, self.size, self.stride)
    }

    /// Runtime descriptor of the window for dynamically typed consumers.
    pub fn descriptor(&self, dtype: DataType) -> Result<ArrayDescriptor> {
        descriptor(
            self.ring.space(),
            dtype,
            self.ptr,
            self.nringlet,
            self.size,
            self.stride,
        )
    }

    /// Publishes exactly `nbytes` of the reservation (`0 <= nbytes <= size`);
    /// the residual slack returns to the free pool.
    pub fn commit(mut self, nbytes: u64) -> Result<()> {
        if nbytes > self.size {
            return Err(RingError::InvalidArgument(
                "commit size exceeds the reservation",
            ));
        }
        self.committed = true;
        self.ring.commit_span(nbytes)
    }
}

impl Drop for WriteSpan<'_> {
    fn drop(&mut self) {
        if !self.committed {
            // An abandoned reservation publishes nothing.
            let _ = self.ring.commit_span(0);
        }
    }
}

impl std::fmt::Debug for WriteSpan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSpan").field("info", &self.info()).finish()
    }
}

/// An acquired, readable window of a sequence.
///
/// For best-effort readers the effective window may start past the requested
/// offset (the skipped amount is in [`ReadSpan::nbytes_skipped`]) and the
/// writer may stomp it mid-flight ([`ReadSpan::nbytes_overwritten`]).
/// Guaranteed readers observe neither.
pub struct ReadSpan<'seq> {
    ring: Ring,
    reader: u64,
    ptr: *const u8,
    /// Effective offset from the sequence begin.
    offset: u64,
    requested_offset: u64,
    size: u64,
    skipped: u64,
    stride: u64,
    nringlet: u64,
    _seq: PhantomData<&'seq mut ReadSequence>,
}

impl<'seq> ReadSpan<'seq> {
    pub(crate) fn new(
        ring: Ring,
        reader: u64,
        info: AcquireInfo,
        offset: u64,
        requested_offset: u64,
    ) -> Self {
        Self {
            ring,
            reader,
            ptr: info.ptr,
            offset,
            requested_offset,
            size: info.size,
            skipped: info.skipped,
            stride: info.stride,
            nringlet: info.nringlet,
            _seq: PhantomData,
        }
    }

    /// Bytes per ringlet actually exposed; may be shorter than requested at
    /// the end of a closed sequence.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Effective offset from the sequence begin.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The offset the caller asked for.
    #[inline]
    pub fn requested_offset(&self) -> u64 {
        self.requested_offset
    }

    /// Bytes between the requested and the effective start, capped at the
    /// request size. Zero for guaranteed readers.
    #[inline]
    pub fn nbytes_skipped(&self) -> u64 {
        self.skipped
    }

    #[inline]
    pub fn nringlet(&self) -> u64 {
        self.nringlet
    }

    pub fn info(&self) -> SpanInfo {
        SpanInfo {
            offset: self.offset,
            size: self.size,
            stride: self.stride,
            nringlet: self.nringlet,
        }
    }

    /// Bytes of this window the writer has stomped since acquire; monotone
    /// non-decreasing until release. Always zero for guaranteed readers.
    pub fn nbytes_overwritten(&self) -> u64 {
        self.ring.span_overwritten(self.reader)
    }

    /// Bytes of one ringlet row.
    ///
    /// # Panics
    ///
    /// Panics if `ringlet` is out of range.
    pub fn ringlet(&self, ringlet: u64) -> &[u8] {
        assert!(ringlet < self.nringlet, "ringlet index out of range");
        // SAFETY: the acquisition pinned [ptr + ringlet*stride, +size); for
        // guaranteed readers the writer cannot touch it, for best-effort
        // readers tearing is accepted and reported by the ring.
        unsafe {
            std::slice::from_raw_parts(
                self.ptr.add((ringlet * self.stride) as usize),
                self.size as usize,
            )
        }
    }

    /// Bytes of the first ringlet row; the whole window when `nringlet == 1`.
    pub fn as_slice(&self) -> &[u8] {
        self.ringlet(0)
    }

    /// Typed `nringlet x n` view over the window.
    pub fn view<T: Copy>(&self) -> Result<StridedView<'_, T>> {
        StridedView::from_raw(self.ptr.cast::<T>(), self.nringlet, self.size, self.stride)
    }

    /// Runtime descriptor of the window for dynamically typed consumers.
    pub fn descriptor(&self, dtype: DataType) -> Result<ArrayDescriptor> {
        descriptor(
            self.ring.space(),
            dtype,
            self.ptr.cast_mut(),
            self.nringlet,
            self.size,
            self.stride,
        )
    }

    /// Explicit release; equivalent to dropping.
    pub fn release(self) {}
}

impl Drop for ReadSpan<'_> {
    fn drop(&mut self) {
        let _ = self.ring.release_span(self.reader);
    }
}

impl std::fmt::Debug for ReadSpan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSpan")
            .field("info", &self.info())
            .field("skipped", &self.skipped)
            .finish()
    }
}

fn descriptor(
    space: crate::space::MemorySpace,
    dtype: DataType,
    data: *mut u8,
    nringlet: u64,
    size: u64,
    stride: u64,
) -> Result<ArrayDescriptor> {
    let elem = dtype.nbytes() as u64;
    if size % elem != 0 {
        return Err(RingError::InvalidArgument(
            "element size does not divide the span size",
        ));
    }
    Ok(ArrayDescriptor {
        space,
        dtype,
        shape: vec![nringlet as usize, (size / elem) as usize],
        strides: vec![stride as isize, elem as isize],
        data,
        conjugated: false,
        big_endian: false,
    })
}
