//! Per-thread device stream.
//!
//! Each pipeline-stage thread carries one stream, initialized on first use
//! and torn down at thread exit. Transfers that touch a stream-ordered memory
//! space are enqueued here by the memory layer and complete, in issue order,
//! only when the owning thread calls [`synchronize`]. The ring subsystem
//! reads the stream for cross-space copies but never owns it: producers must
//! synchronize before committing device-produced bytes, and consumers of
//! such data inherit the happens-before only after that sync.

use std::cell::RefCell;
use std::collections::VecDeque;

enum PendingOp {
    Copy {
        dst: *mut u8,
        src: *const u8,
        nbytes: usize,
    },
    Memset {
        dst: *mut u8,
        value: u8,
        nbytes: usize,
    },
}

struct DeviceStream {
    pending: VecDeque<PendingOp>,
}

impl DeviceStream {
    const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

thread_local! {
    static STREAM: RefCell<DeviceStream> = const { RefCell::new(DeviceStream::new()) };
}

pub(crate) fn enqueue_copy(dst: *mut u8, src: *const u8, nbytes: usize) {
    STREAM.with(|s| {
        s.borrow_mut()
            .pending
            .push_back(PendingOp::Copy { dst, src, nbytes });
    });
}

pub(crate) fn enqueue_memset(dst: *mut u8, value: u8, nbytes: usize) {
    STREAM.with(|s| {
        s.borrow_mut()
            .pending
            .push_back(PendingOp::Memset { dst, value, nbytes });
    });
}

/// Completes every operation queued on the current thread's stream, in issue
/// order. Returns the number of operations retired.
pub fn synchronize() -> usize {
    STREAM.with(|s| {
        let mut stream = s.borrow_mut();
        let mut retired = 0;
        while let Some(op) = stream.pending.pop_front() {
            // SAFETY: the issuing call's contract requires both operands to
            // stay valid and non-overlapping until the stream synchronizes.
            unsafe {
                match op {
                    PendingOp::Copy { dst, src, nbytes } => {
                        std::ptr::copy_nonoverlapping(src, dst, nbytes);
                    }
                    PendingOp::Memset { dst, value, nbytes } => {
                        std::ptr::write_bytes(dst, value, nbytes);
                    }
                }
            }
            retired += 1;
        }
        retired
    })
}

/// Number of operations queued on the current thread's stream.
pub fn pending_ops() -> usize {
    STREAM.with(|s| s.borrow().pending.len())
}
