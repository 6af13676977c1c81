#![allow(dead_code)]

use kernel_alloc::MemoryManager;
use kernel_info::boot::{MemoryMapEntry, MemoryRegionType};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::emulated::EmulatedMachine;

/// 8 MiB of RAM.
pub const RAM_FRAMES: u32 = 2048;

/// First byte after the pretend kernel image.
pub const KERNEL_END: u32 = 0x0002_0000;

/// directory, identity table, window table, 253 kernel tables and the
/// first frame stack page, all taken by the bump allocator
pub const BOOT_FRAMES: u32 = 3 + 253 + 1;

/// Frames the memory map below contributes.
pub const SEEDED_FRAMES: u32 = (0x0080_0000 - (KERNEL_END + BOOT_FRAMES * 0x1000)) / 0x1000;

pub fn memory_map() -> [MemoryMapEntry; 3] {
    [
        MemoryMapEntry::usable(0, 0x9_F000),
        MemoryMapEntry::new(0x9_F000, 0x6_1000, MemoryRegionType::Reserved),
        MemoryMapEntry::usable(0x10_0000, 0x70_0000),
    ]
}

pub fn boot() -> MemoryManager<EmulatedMachine> {
    let machine = EmulatedMachine::new(RAM_FRAMES);
    unsafe { MemoryManager::init(machine, PhysicalAddress::new(KERNEL_END), &memory_map()) }
        .expect("boot")
}

pub fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}
