//! Physical frames backing page tables.

use kernel_memory_addresses::{PAGE_SIZE, PageFrameNumber};

/// Bytes in one frame.
#[allow(clippy::cast_possible_truncation)]
pub const FRAME_BYTES: usize = PAGE_SIZE as usize;

/// One 4 KiB page-aligned frame, viewed as raw little-endian bytes.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageFrame([u8; FRAME_BYTES]);

impl PageFrame {
    pub const ZEROED: Self = Self([0; FRAME_BYTES]);

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FRAME_BYTES] {
        &self.0
    }

    #[inline]
    pub fn zero(&mut self) {
        self.0.fill(0);
    }

    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// # Panics
    /// If `offset + 8` exceeds the frame.
    #[inline]
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut raw = [0; 8];
        raw.copy_from_slice(&self.0[offset..offset + 8]);
        u64::from_le_bytes(raw)
    }

    /// # Panics
    /// If `offset + 8` exceeds the frame.
    #[inline]
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.0[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// # Panics
    /// If `offset + 4` exceeds the frame.
    #[inline]
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0; 4];
        raw.copy_from_slice(&self.0[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    /// # Panics
    /// If `offset + 4` exceeds the frame.
    #[inline]
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.0[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Source of page-table frames, addressed by frame number.
///
/// The builder never dereferences physical addresses itself; it asks the
/// arena for the frame behind a number. Under firmware the arena is identity
/// mapped, in tests it is a plain array with a made-up base frame.
pub trait FrameArena {
    /// Hands out a fresh, zero-filled frame.
    ///
    /// Returns `None` when the arena is exhausted.
    fn allocate_frame(&mut self) -> Option<PageFrameNumber>;

    /// The frame behind `pfn`, if this arena owns it.
    fn frame(&self, pfn: PageFrameNumber) -> Option<&PageFrame>;

    /// The frame behind `pfn`, if this arena owns it.
    fn frame_mut(&mut self, pfn: PageFrameNumber) -> Option<&mut PageFrame>;
}

/// A fixed pool of `N` frames pretending to live at `base` onwards.
pub struct StaticArena<const N: usize> {
    base: PageFrameNumber,
    used: usize,
    frames: [PageFrame; N],
}

impl<const N: usize> StaticArena<N> {
    #[must_use]
    pub const fn new(base: PageFrameNumber) -> Self {
        Self {
            base,
            used: 0,
            frames: [PageFrame::ZEROED; N],
        }
    }

    /// Number of frames handed out so far.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Frame numbers handed out so far, in allocation order.
    pub fn allocated(&self) -> impl Iterator<Item = PageFrameNumber> + '_ {
        (0..self.used as u64).map(|i| PageFrameNumber::new(self.base.as_u64() + i))
    }

    fn slot(&self, pfn: PageFrameNumber) -> Option<usize> {
        let index = usize::try_from(pfn.as_u64().checked_sub(self.base.as_u64())?).ok()?;
        (index < self.used).then_some(index)
    }
}

impl<const N: usize> FrameArena for StaticArena<N> {
    fn allocate_frame(&mut self) -> Option<PageFrameNumber> {
        if self.used == N {
            return None;
        }

        let index = self.used;
        self.used += 1;
        self.frames[index].zero();
        Some(PageFrameNumber::new(self.base.as_u64() + index as u64))
    }

    fn frame(&self, pfn: PageFrameNumber) -> Option<&PageFrame> {
        self.slot(pfn).map(|i| &self.frames[i])
    }

    fn frame_mut(&mut self, pfn: PageFrameNumber) -> Option<&mut PageFrame> {
        self.slot(pfn).map(|i| &mut self.frames[i])
    }
}
