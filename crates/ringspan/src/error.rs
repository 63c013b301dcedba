use crate::space::MemorySpace;
use thiserror::Error;

/// Error taxonomy for ring, sequence, span, and memory operations.
///
/// Readers treat [`RingError::EndOfData`] as a normal terminal condition;
/// everything else is either a retryable condition (`WouldBlock`) or a hard
/// failure that callers should not retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Normal terminal condition for readers; loops stop here.
    #[error("end of data")]
    EndOfData,

    /// A nonblocking reserve or acquire could not complete immediately.
    #[error("operation would block")]
    WouldBlock,

    /// No live sequence matches the request.
    #[error("no sequence matches the request")]
    NoSuchSequence,

    /// The requested sequence has already scrolled past the ring tail.
    #[error("requested sequence has scrolled past the ring tail")]
    SequenceExpired,

    /// Caller-supplied argument is out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A pointer was used with a memory space it does not belong to.
    #[error("pointer does not belong to the given memory space")]
    InvalidSpace,

    /// The pointer is not a known allocation of the memory layer.
    #[error("pointer is not a known allocation")]
    UnknownPointer,

    /// Allocation failed.
    #[error("allocation of {nbytes} bytes in {space} failed")]
    OutOfMemory { nbytes: usize, space: MemorySpace },

    /// The requested memory space cannot be backed by the runtime.
    ///
    /// Part of the allocator's error taxonomy for builds with a real device
    /// runtime. The host-emulated allocator in this build backs every space,
    /// so it never produces this variant; only [`RingError::OutOfMemory`]
    /// is a live allocation failure here.
    #[error("memory space {0} is unavailable")]
    SpaceUnavailable(MemorySpace),

    /// The ring cannot be reconfigured while spans are open.
    #[error("ring is busy: spans are still open")]
    RingBusy,

    /// The ring or sequence is closed for writing.
    #[error("closed for writing")]
    Closed,

    /// An internal invariant was violated; not recoverable.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl RingError {
    /// Returns `true` for the normal reader termination signal.
    #[inline]
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Self::EndOfData)
    }

    /// Returns `true` if the operation may succeed when retried later.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RingError>;
