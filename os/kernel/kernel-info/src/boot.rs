//! # Kernel Boot Information

/// Information the kernel needs right after firmware services are gone.
///
/// Keep this `#[repr(C)]` and stick to fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelBootInfo {
    /// The firmware memory map as captured when boot services were exited.
    pub mmap: MemoryMapInfo,

    /// Physical address of the committed top-level page table.
    pub root_table: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMapInfo {
    /// Pointer to the raw descriptor array, or 0 if it was not retained.
    pub mmap_ptr: u64,

    /// Length of the descriptor buffer in **bytes**.
    pub mmap_len: u64,

    /// Size of a single descriptor in bytes; may exceed the struct size.
    pub mmap_desc_size: u64,

    /// Descriptor version reported by the firmware.
    pub mmap_desc_version: u32,
}

impl MemoryMapInfo {
    /// Number of descriptors in the buffer.
    #[must_use]
    pub const fn descriptor_count(&self) -> u64 {
        if self.mmap_desc_size == 0 {
            0
        } else {
            self.mmap_len / self.mmap_desc_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_count_uses_the_reported_stride() {
        let info = MemoryMapInfo {
            mmap_ptr: 0x1000,
            mmap_len: 48 * 10,
            mmap_desc_size: 48,
            mmap_desc_version: 1,
        };
        assert_eq!(info.descriptor_count(), 10);
        assert_eq!(MemoryMapInfo::default().descriptor_count(), 0);
    }
}
