use ringspan_rs::space::{self, Buffer, MemorySpace};
use ringspan_rs::{accessible, alignment, stream, RingError};

#[test]
fn test_cross_space_staging_copy() {
    // Fill device memory from the host through pinned staging, then read it
    // back. Both transfers are stream-ordered and invisible before sync.
    let mut staging = Buffer::new(1024, MemorySpace::PinnedHost).unwrap();
    for (i, byte) in staging.host_slice_mut().unwrap().iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    let device = Buffer::new(1024, MemorySpace::Device).unwrap();

    // SAFETY: both buffers are 1024 bytes and outlive the synchronize below.
    unsafe {
        space::copy(
            device.as_ptr(),
            MemorySpace::Device,
            staging.as_ptr(),
            MemorySpace::PinnedHost,
            1024,
        );
    }
    assert_eq!(stream::pending_ops(), 1, "device copy must be deferred");
    assert_eq!(stream::synchronize(), 1);

    let out = Buffer::new(1024, MemorySpace::Host).unwrap();
    // SAFETY: as above.
    unsafe {
        space::copy(
            out.as_ptr(),
            MemorySpace::Host,
            device.as_ptr(),
            MemorySpace::Device,
            1024,
        );
    }
    assert_eq!(stream::synchronize(), 1);
    assert_eq!(out.host_slice().unwrap(), staging.host_slice().unwrap());
}

#[test]
fn test_host_copy_completes_immediately() {
    let mut src = Buffer::new(64, MemorySpace::Host).unwrap();
    src.host_slice_mut().unwrap().fill(0x7E);
    let out = Buffer::new(64, MemorySpace::Host).unwrap();
    // SAFETY: both buffers are 64 bytes.
    unsafe {
        space::copy(
            out.as_ptr(),
            MemorySpace::Host,
            src.as_ptr(),
            MemorySpace::Host,
            64,
        );
    }
    assert_eq!(stream::pending_ops(), 0);
    assert_eq!(out.host_slice().unwrap(), &[0x7E; 64][..]);
}

#[test]
fn test_device_memset_deferred_until_sync() {
    let device = Buffer::new(128, MemorySpace::Device).unwrap();
    // SAFETY: the buffer is 128 bytes and outlives the synchronize.
    unsafe {
        space::memset(device.as_ptr(), MemorySpace::Device, 0x55, 128);
    }
    assert_eq!(stream::pending_ops(), 1);
    stream::synchronize();

    let out = Buffer::new(128, MemorySpace::Host).unwrap();
    // SAFETY: both buffers are 128 bytes.
    unsafe {
        space::copy(
            out.as_ptr(),
            MemorySpace::Host,
            device.as_ptr(),
            MemorySpace::Device,
            128,
        );
    }
    stream::synchronize();
    assert_eq!(out.host_slice().unwrap(), &[0x55; 128][..]);
}

#[test]
fn test_accessibility_relation_full_table() {
    use MemorySpace::*;
    // Every space is accessible from itself.
    for s in MemorySpace::ALL {
        assert!(accessible(s, &[s]));
    }
    // From host: host, pinned host, unified.
    for s in [Host, PinnedHost, Unified] {
        assert!(accessible(s, &[Host]));
    }
    assert!(!accessible(Device, &[Host]));
    // From device: device, unified.
    for s in [Device, Unified] {
        assert!(accessible(s, &[Device]));
    }
    assert!(!accessible(Host, &[Device]));
    assert!(!accessible(PinnedHost, &[Device]));
    // Multi-space origin.
    assert!(accessible(Unified, &[Host, Device]));
    assert!(accessible(Device, &[Host, Device]));
}

#[test]
fn test_allocations_are_page_aligned() {
    assert!(alignment() >= 4096);
    for s in MemorySpace::ALL {
        let buf = Buffer::new(33, s).unwrap();
        assert_eq!(buf.as_ptr() as usize % alignment(), 0);
        assert_eq!(buf.space(), s);
        assert_eq!(buf.len(), 33);
    }
}

#[test]
fn test_registry_space_queries() {
    let ptr = space::malloc(256, MemorySpace::Unified).unwrap();
    assert_eq!(space::space_of(ptr).unwrap(), MemorySpace::Unified);
    // Auto space resolution on free.
    space::free(ptr, None).unwrap();
    assert_eq!(space::space_of(ptr).unwrap_err(), RingError::UnknownPointer);
    assert_eq!(space::free(ptr, None).unwrap_err(), RingError::UnknownPointer);
}

#[test]
fn test_device_buffer_not_host_addressable() {
    let mut buf = Buffer::new(16, MemorySpace::Device).unwrap();
    assert!(buf.host_slice().is_none());
    assert!(buf.host_slice_mut().is_none());
    let mut pinned = Buffer::new(16, MemorySpace::PinnedHost).unwrap();
    assert!(pinned.host_slice().is_some());
    assert!(pinned.host_slice_mut().is_some());
}
