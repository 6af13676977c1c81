//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the memory layout constants and the boot memory map
//! contract shared by the physical frame allocator, the paging layer and the
//! early boot code.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! Fixed virtual ranges of the 32-bit address space:
//! * **Identity Map**: the first 4 MiB, virtual == physical in every directory
//! * **User Space**: private per address space, below the kernel boundary
//! * **Kernel Space**: shared by reference between all page directories
//! * **Reserved Windows**: the free-frame stack, the scratch window and the
//!   recursively mapped paging structures at the top of memory
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ Identity map (kernel image,     │
//!             │ boot allocations)               │
//! 0x0040_0000 ├─────────────────────────────────┤ IDENTITY_MAPPED_END
//!             │          User Space             │
//!             │   (private page tables)         │
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_START
//!             │ Higher-half alias of low 4 MiB  │
//! 0xD000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_START
//!             │          Kernel Heap            │
//! 0xE000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_END
//!             │            (unused)             │
//! 0xFF00_0000 ├─────────────────────────────────┤ FRAME_STACK_START
//!             │       Free-frame stack          │
//! 0xFF40_0000 ├─────────────────────────────────┤ SCRATCH_WINDOW_START
//!             │        Scratch window           │
//! 0xFF80_0000 ├─────────────────────────────────┤ RECURSIVE_REGION_START
//!             │ Slot 1022: directory window     │ PAGE_DIRECTORY_WINDOW
//! 0xFFC0_0000 ├─────────────────────────────────┤ PAGE_TABLES_WINDOW
//!             │ Slot 1023: page tables window   │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Boot Information ([`boot`])
//! The memory map handed over by the boot loader: ordered
//! `(base, length, type)` records of which only usable RAM feeds the frame
//! allocator, plus a reader for the raw Multiboot `mmap` buffer.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
