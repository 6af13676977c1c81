//! # Memory Layout

use kernel_memory_addresses::PAGE_SIZE;

/// Bytes covered by one page directory entry (one page table).
pub const TABLE_SPAN: u32 = 1024 * PAGE_SIZE;

/// End of the identity-mapped low memory (exclusive).
///
/// Every directory maps `0..IDENTITY_MAPPED_END` to the same physical range,
/// which is where the kernel image and all boot-time allocations live.
pub const IDENTITY_MAPPED_END: u32 = 0x0040_0000; // 4 MiB

/// First user-space address; user space is private to each directory.
pub const USER_SPACE_START: u32 = IDENTITY_MAPPED_END;

/// Kernel space starts here. Directory entries from this boundary up to the
/// recursive slots are shared by every address space.
pub const KERNEL_START: u32 = 0xC000_0000;

/// End of user space (exclusive).
pub const USER_SPACE_END: u32 = KERNEL_START;

/// Base of the virtual range handed to the kernel heap.
pub const KERNEL_HEAP_START: u32 = KERNEL_START + 0x1000_0000;

/// End of the kernel heap range (exclusive).
pub const KERNEL_HEAP_END: u32 = 0xE000_0000;

/// Base of the free-frame stack. One `u32` frame address per slot; the region
/// is large enough to describe every frame of a 4 GiB physical space.
pub const FRAME_STACK_START: u32 = 0xFF00_0000;

/// End of the free-frame stack region (exclusive).
pub const FRAME_STACK_END: u32 = FRAME_STACK_START + TABLE_SPAN;

/// Base of the scratch window used for short-lived mappings of arbitrary frames.
pub const SCRATCH_WINDOW_START: u32 = FRAME_STACK_END;

/// Number of pages in the scratch window.
pub const SCRATCH_WINDOW_PAGES: u32 = 32;

/// End of the scratch window (exclusive).
pub const SCRATCH_WINDOW_END: u32 = SCRATCH_WINDOW_START + SCRATCH_WINDOW_PAGES * PAGE_SIZE;

/// Directory index of the slot holding the table that maps the directory.
pub const DIRECTORY_WINDOW_SLOT: usize = 1022;

/// Directory index of the slot that maps the directory onto itself.
pub const PAGE_TABLES_SLOT: usize = 1023;

/// Start of the 8 MiB covered by the two recursive slots.
#[allow(clippy::cast_possible_truncation)]
pub const RECURSIVE_REGION_START: u32 = DIRECTORY_WINDOW_SLOT as u32 * TABLE_SPAN;

/// The current directory, seen through slot 1022 whose table maps the
/// directory frame at its last entry.
pub const PAGE_DIRECTORY_WINDOW: u32 = RECURSIVE_REGION_START + 1023 * PAGE_SIZE;

/// The current page tables: table `i` is visible at `PAGE_TABLES_WINDOW + i * 4096`.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_TABLES_WINDOW: u32 = PAGE_TABLES_SLOT as u32 * TABLE_SPAN;

/// The current directory, seen as page table 1023 of the page tables window.
pub const PAGE_DIRECTORY_SELF_WINDOW: u32 = PAGE_TABLES_WINDOW + 1023 * PAGE_SIZE;

const _: () = {
    assert!(IDENTITY_MAPPED_END.is_multiple_of(TABLE_SPAN));
    assert!(KERNEL_START.is_multiple_of(TABLE_SPAN));
    assert!(USER_SPACE_START < USER_SPACE_END);
    assert!(KERNEL_HEAP_START >= KERNEL_START);
    assert!(KERNEL_HEAP_START < KERNEL_HEAP_END);
    assert!(KERNEL_HEAP_END <= FRAME_STACK_START);
    assert!(FRAME_STACK_START.is_multiple_of(TABLE_SPAN));
    // the stack and the scratch window each sit in a single page table
    assert!(FRAME_STACK_END - FRAME_STACK_START == TABLE_SPAN);
    assert!(SCRATCH_WINDOW_START.is_multiple_of(TABLE_SPAN));
    assert!(SCRATCH_WINDOW_PAGES <= 1024);
    assert!(SCRATCH_WINDOW_END <= RECURSIVE_REGION_START);
    assert!(PAGE_DIRECTORY_WINDOW == 0xFFBF_F000);
    assert!(PAGE_TABLES_WINDOW == 0xFFC0_0000);
    assert!(PAGE_DIRECTORY_SELF_WINDOW == 0xFFFF_F000);
};
