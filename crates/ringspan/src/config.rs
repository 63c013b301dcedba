use crate::error::{Result, RingError};

/// Multiplier applied to the gulp size when `total_span` is left unspecified.
pub const DEFAULT_BUFFER_FACTOR: u64 = 4;

/// Validated byte layout of a ring's backing buffer.
///
/// A ring holds `nringlet` parallel rows. Each row is `total_span` canonical
/// bytes followed by a gulp-sized ghost region that mirrors the row head, so
/// that any span of at most `contiguous_span` bytes is contiguous in memory
/// even when it straddles the wrap point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    contiguous_span: u64,
    total_span: u64,
    nringlet: u64,
}

impl RingLayout {
    /// Builds a layout, defaulting `total_span` to
    /// `contiguous_span * DEFAULT_BUFFER_FACTOR`.
    pub fn new(contiguous_span: u64, total_span: Option<u64>, nringlet: u64) -> Result<Self> {
        let total_span =
            total_span.unwrap_or_else(|| contiguous_span.saturating_mul(DEFAULT_BUFFER_FACTOR));
        if contiguous_span == 0 {
            return Err(RingError::InvalidArgument("contiguous span must be non-zero"));
        }
        if nringlet == 0 {
            return Err(RingError::InvalidArgument("ringlet count must be non-zero"));
        }
        if contiguous_span > total_span {
            return Err(RingError::InvalidArgument(
                "contiguous span exceeds total span",
            ));
        }
        let row = total_span
            .checked_add(contiguous_span)
            .ok_or(RingError::InvalidArgument("ring layout overflows"))?;
        let bytes = row
            .checked_mul(nringlet)
            .ok_or(RingError::InvalidArgument("ring layout overflows"))?;
        usize::try_from(bytes)
            .map_err(|_| RingError::InvalidArgument("ring layout overflows"))?;
        Ok(Self {
            contiguous_span,
            total_span,
            nringlet,
        })
    }

    /// Largest reservation or acquisition, in bytes per ringlet.
    #[inline]
    pub fn contiguous_span(&self) -> u64 {
        self.contiguous_span
    }

    /// Canonical bytes per ringlet row; the writer may run this far ahead of
    /// the slowest guaranteed reader.
    #[inline]
    pub fn total_span(&self) -> u64 {
        self.total_span
    }

    #[inline]
    pub fn nringlet(&self) -> u64 {
        self.nringlet
    }

    /// Ghost bytes appended to each row so any gulp stays contiguous.
    #[inline]
    pub(crate) fn ghost_span(&self) -> u64 {
        self.contiguous_span
    }

    /// Physical stride in bytes between consecutive ringlet rows.
    #[inline]
    pub fn stride(&self) -> u64 {
        self.total_span + self.ghost_span()
    }

    /// Size of the whole backing allocation.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        (self.stride() * self.nringlet) as usize
    }

    /// Physical row offset of a logical byte offset.
    #[inline]
    pub(crate) fn phys(&self, offset: u64) -> u64 {
        offset % self.total_span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_defaults_total_span() {
        let layout = RingLayout::new(1024, None, 1).unwrap();
        assert_eq!(layout.total_span(), 4096);
        assert_eq!(layout.stride(), 5120);
        assert_eq!(layout.buffer_size(), 5120);
    }

    #[test]
    fn test_layout_rejects_oversized_gulp() {
        assert_eq!(
            RingLayout::new(4096, Some(1024), 1),
            Err(RingError::InvalidArgument(
                "contiguous span exceeds total span"
            ))
        );
    }

    #[test]
    fn test_layout_rejects_degenerate_values() {
        assert!(RingLayout::new(0, None, 1).is_err());
        assert!(RingLayout::new(64, None, 0).is_err());
        assert!(RingLayout::new(u64::MAX, Some(u64::MAX), 2).is_err());
    }

    #[test]
    fn test_layout_ringlet_rows() {
        let layout = RingLayout::new(128, Some(512), 4).unwrap();
        assert_eq!(layout.stride(), 640);
        assert_eq!(layout.buffer_size(), 4 * 640);
        assert_eq!(layout.phys(513), 1);
    }
}
