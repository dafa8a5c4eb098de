//! # Trace output
//!
//! Raw debug console dumps for the moments when the log backend can no longer
//! be trusted: boot services are gone and the new root is live.

use kernel_info::boot::KernelBootInfo;
use kernel_qemu::qemu_trace;

pub fn trace_boot_info(boot_info: &KernelBootInfo) {
    qemu_trace!("Boot Info in UEFI Loader:\n");
    qemu_trace!("   BI ptr = {:018x}\n", core::ptr::from_ref(boot_info) as usize);
    qemu_trace!(" MMAP ptr = {:018x}", boot_info.mmap.mmap_ptr);
    qemu_trace!(", MMAP len = {}", boot_info.mmap.mmap_len);
    qemu_trace!(", MMAP desc size = {}", boot_info.mmap.mmap_desc_size);
    qemu_trace!(", MMAP desc version = {}", boot_info.mmap.mmap_desc_version);
    qemu_trace!(", descriptors = {}\n", boot_info.mmap.descriptor_count());
    qemu_trace!("     root = {:018x}\n", boot_info.root_table);
}
