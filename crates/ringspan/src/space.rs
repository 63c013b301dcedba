//! Memory spaces and the registry-backed raw allocator.
//!
//! Every buffer in the pipeline lives in exactly one of four spaces. This
//! build has no device toolchain, so all four are backed by page-aligned host
//! allocations, but the accessibility relation and the stream discipline for
//! device-involved transfers are enforced at the API layer: code written
//! against this module keeps the same synchronization obligations it would
//! have against a real accelerator runtime.

use crate::error::{Result, RingError};
use crate::stream;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Alignment guaranteed by every allocation (one page).
pub const ALIGNMENT: usize = 4096;

/// Tag identifying where bytes physically reside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Ordinary pageable host memory.
    Host,
    /// Page-locked host memory, directly addressable by transfer engines.
    PinnedHost,
    /// Accelerator-resident memory.
    Device,
    /// Managed memory migrated on demand between host and device.
    Unified,
}

impl MemorySpace {
    /// All spaces, in declaration order.
    pub const ALL: [MemorySpace; 4] = [
        MemorySpace::Host,
        MemorySpace::PinnedHost,
        MemorySpace::Device,
        MemorySpace::Unified,
    ];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            MemorySpace::Host => "host",
            MemorySpace::PinnedHost => "pinned_host",
            MemorySpace::Device => "device",
            MemorySpace::Unified => "unified",
        }
    }

    /// Whether transfers touching this space are ordered by the per-thread
    /// device stream rather than completing immediately.
    #[inline]
    pub(crate) fn is_stream_ordered(self) -> bool {
        matches!(self, MemorySpace::Device | MemorySpace::Unified)
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemorySpace {
    type Err = RingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" | "system" => Ok(MemorySpace::Host),
            "pinned_host" | "cuda_host" => Ok(MemorySpace::PinnedHost),
            "device" | "cuda" => Ok(MemorySpace::Device),
            "unified" | "cuda_managed" => Ok(MemorySpace::Unified),
            _ => Err(RingError::InvalidArgument("unknown memory space name")),
        }
    }
}

/// Whether data resident in `space` can be dereferenced directly from any of
/// `from_spaces` without an explicit copy.
///
/// Host code reaches host, pinned, and unified memory; device code reaches
/// device and unified memory. Every space is accessible from itself.
pub fn accessible(space: MemorySpace, from_spaces: &[MemorySpace]) -> bool {
    if from_spaces.contains(&space) {
        return true;
    }
    match space {
        MemorySpace::PinnedHost => from_spaces.contains(&MemorySpace::Host),
        MemorySpace::Unified => {
            from_spaces.contains(&MemorySpace::Host) || from_spaces.contains(&MemorySpace::Device)
        }
        MemorySpace::Host | MemorySpace::Device => false,
    }
}

/// The allocator's guaranteed alignment in bytes.
#[inline]
pub const fn alignment() -> usize {
    ALIGNMENT
}

struct AllocInfo {
    space: MemorySpace,
    layout: Layout,
}

fn registry() -> &'static Mutex<HashMap<usize, AllocInfo>> {
    static REGISTRY: OnceLock<Mutex<HashMap<usize, AllocInfo>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_registry() -> MutexGuard<'static, HashMap<usize, AllocInfo>> {
    registry().lock().unwrap_or_else(PoisonError::into_inner)
}

/// Allocates `nbytes` in `space`, aligned to [`ALIGNMENT`]. Allocations are
/// zero-initialized so freshly reserved spans never expose stale bytes.
///
/// This build backs every space with host memory, so allocation fails only
/// with [`RingError::OutOfMemory`]; [`RingError::SpaceUnavailable`] is
/// reserved for builds whose device runtime cannot back the requested space
/// and is never produced here.
pub fn malloc(nbytes: usize, space: MemorySpace) -> Result<NonNull<u8>> {
    if nbytes == 0 {
        return Err(RingError::InvalidArgument("cannot allocate zero bytes"));
    }
    let layout = Layout::from_size_align(nbytes, ALIGNMENT)
        .map_err(|_| RingError::InvalidArgument("allocation size overflows the address space"))?;
    // SAFETY: layout has non-zero size.
    let raw = unsafe { alloc_zeroed(layout) };
    let Some(ptr) = NonNull::new(raw) else {
        return Err(RingError::OutOfMemory { nbytes, space });
    };
    lock_registry().insert(ptr.as_ptr() as usize, AllocInfo { space, layout });
    Ok(ptr)
}

/// Frees a pointer previously returned by [`malloc`].
///
/// Passing `None` for `space` infers it from the allocator registry; passing
/// the wrong explicit space is [`RingError::InvalidSpace`].
pub fn free(ptr: NonNull<u8>, space: Option<MemorySpace>) -> Result<()> {
    let key = ptr.as_ptr() as usize;
    let mut reg = lock_registry();
    let Some(info) = reg.remove(&key) else {
        return Err(RingError::UnknownPointer);
    };
    if let Some(requested) = space {
        if requested != info.space {
            reg.insert(key, info);
            return Err(RingError::InvalidSpace);
        }
    }
    drop(reg);
    // SAFETY: ptr came from `alloc` with exactly this layout and was just
    // removed from the registry, so it cannot be freed twice.
    unsafe { dealloc(ptr.as_ptr(), info.layout) };
    Ok(())
}

/// Reports the space a pointer was allocated in.
///
/// Only base pointers returned by [`malloc`] are known; interior pointers
/// yield [`RingError::UnknownPointer`].
pub fn space_of(ptr: NonNull<u8>) -> Result<MemorySpace> {
    lock_registry()
        .get(&(ptr.as_ptr() as usize))
        .map(|info| info.space)
        .ok_or(RingError::UnknownPointer)
}

/// Copies `nbytes` from `src` to `dst`.
///
/// Pure host transfers complete before returning. When either operand is
/// stream-ordered (`device` or `unified`) the copy is enqueued on the current
/// thread's device stream and completes only at [`stream::synchronize`].
///
/// # Safety
///
/// Both pointers must be valid for `nbytes`, must not overlap, and must stay
/// valid until the copy completes (for stream-ordered transfers: until the
/// issuing thread synchronizes its stream).
pub unsafe fn copy(
    dst: *mut u8,
    dst_space: MemorySpace,
    src: *const u8,
    src_space: MemorySpace,
    nbytes: usize,
) {
    if nbytes == 0 {
        return;
    }
    if dst_space.is_stream_ordered() || src_space.is_stream_ordered() {
        stream::enqueue_copy(dst, src, nbytes);
    } else {
        std::ptr::copy_nonoverlapping(src, dst, nbytes);
    }
}

/// Fills `nbytes` at `dst` with `value`, with the same stream semantics as
/// [`copy`].
///
/// # Safety
///
/// `dst` must be valid for `nbytes` and stay valid until the operation
/// completes.
pub unsafe fn memset(dst: *mut u8, dst_space: MemorySpace, value: u8, nbytes: usize) {
    if nbytes == 0 {
        return;
    }
    if dst_space.is_stream_ordered() {
        stream::enqueue_memset(dst, value, nbytes);
    } else {
        std::ptr::write_bytes(dst, value, nbytes);
    }
}

/// Owned allocation in a memory space; freed on drop.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
    space: MemorySpace,
}

// SAFETY: Buffer owns its allocation exclusively; shared access goes through
// the raw pointer under the caller's synchronization protocol.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Allocates `len` bytes in `space`.
    pub fn new(len: usize, space: MemorySpace) -> Result<Self> {
        let ptr = malloc(len, space)?;
        Ok(Self { ptr, len, space })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn space(&self) -> MemorySpace {
        self.space
    }

    /// Base pointer of the allocation.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Borrows the buffer as bytes when the space is host-addressable.
    pub fn host_slice(&self) -> Option<&[u8]> {
        if accessible(self.space, &[MemorySpace::Host]) {
            // SAFETY: the allocation is len bytes and we hold &self.
            Some(unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) })
        } else {
            None
        }
    }

    /// Mutably borrows the buffer as bytes when the space is host-addressable.
    pub fn host_slice_mut(&mut self) -> Option<&mut [u8]> {
        if accessible(self.space, &[MemorySpace::Host]) {
            // SAFETY: the allocation is len bytes and we hold &mut self.
            Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
        } else {
            None
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let _ = free(self.ptr, Some(self.space));
    }
}
