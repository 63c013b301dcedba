//! ringspan - Shared-Memory Streaming Ring for Signal-Processing Pipelines
//!
//! A named, bounded, append-only FIFO that routes multi-gigabyte-per-second
//! data between concurrently running pipeline stages. One writer produces a
//! stream of *sequences* (headered logical streams of fixed-size frames);
//! many readers consume them independently through scoped *spans*.
//!
//! # Key Features
//!
//! - Zero-copy reserve/commit writing and acquire/release reading
//! - Guaranteed readers (hold the writer back, never see torn data) and
//!   best-effort readers (never hold the writer back, detect overwrites)
//! - Four memory spaces (host, pinned host, device, unified) with explicit
//!   cross-space copies ordered by a per-thread device stream
//! - Optional parallel ringlets: one reservation spans the same byte window
//!   in every ringlet row
//! - Monotonic u64 byte offsets: wrap-around never touches offset arithmetic
//!
//! # Example
//!
//! ```
//! use ringspan_rs::{MemorySpace, Ring};
//!
//! let ring = Ring::create("doc-example", MemorySpace::Host)?;
//! ring.resize(1024, None, 1)?;
//!
//! let writer = ring.begin_writing()?;
//! let mut seq = writer.begin_sequence("obs-1", 0, br#"{"nchan":64}"#)?;
//! let mut span = seq.reserve(1024, false)?;
//! span.as_mut_slice().fill(0xAB);
//! span.commit(1024)?;
//! seq.end()?;
//! writer.end()?;
//!
//! let mut reader = ring.open_earliest_sequence(true)?;
//! let span = reader.acquire(0, 1024)?;
//! assert!(span.as_slice().iter().all(|&b| b == 0xAB));
//! # Ok::<(), ringspan_rs::RingError>(())
//! ```

mod config;
mod error;
mod invariants;
mod metrics;
mod ring;
mod sequence;
mod span;

pub mod array;
pub mod space;
pub mod stream;

pub use config::{RingLayout, DEFAULT_BUFFER_FACTOR};
pub use error::{Result, RingError};
pub use metrics::MetricsSnapshot;
pub use ring::Ring;
pub use sequence::{
    HeaderTransform, ReadSequence, RingView, RingWriter, SpanReader, WriteSequence,
    MAX_HEADER_SIZE,
};
pub use space::{accessible, alignment, Buffer, MemorySpace};
pub use span::{ReadSpan, SpanInfo, WriteSpan};

pub use array::{ArrayDescriptor, DataType, StridedView, StridedViewMut};
