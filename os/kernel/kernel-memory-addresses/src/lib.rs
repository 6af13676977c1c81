//! # 32-bit Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and 4 KiB page bases used
//! by the two-level i386 paging code.
//!
//! ## Overview
//!
//! The types prevent mixing virtual and physical addresses at compile time
//! while remaining zero-cost wrappers around `u32` values:
//!
//! | Concept | Description |
//! |---------|-------------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage`] | A 4 KiB aligned base address. |
//! | [`PageOffset`] | An offset within a 4 KiB page (`0..4096`). |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |---------|---------|
//! | [`VirtualAddress`] / [`VirtualPage`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Refer to physical memory, i.e. frames. |
//!
//! Only 4 KiB pages exist: without PSE or PAE a page directory entry always
//! refers to a page table, and a page table entry always maps a single frame.
//!
//! ## Construction
//!
//! Page types are built either by rounding ([`PhysicalPage::containing_address`])
//! or by a fallible constructor that rejects unaligned input
//! ([`PhysicalPage::try_new`]). Values handed over by firmware arrive as 64-bit
//! numbers and are narrowed with [`PhysicalAddress::try_from_u64`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! let (frame, offset) = pa.split();
//! assert_eq!(frame.base().as_u32(), 0x0010_2000);
//! assert_eq!(offset.as_u32(), 0x42);
//! assert_eq!(frame.join(offset), pa);
//!
//! assert!(PhysicalPage::try_new(pa).is_err());
//! assert!(PhysicalAddress::try_from_u64(0x1_0000_0000).is_err());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod memory_address;
mod memory_page;
mod page_offset;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_page::MemoryPage;
pub use page_offset::PageOffset;
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2 of [`PAGE_SIZE`]; the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page base bits of an address.
pub const PAGE_MASK: u32 = !(PAGE_SIZE - 1);

/// Number of distinct 4 KiB pages in a 32-bit address space.
pub const PAGE_COUNT: u32 = 1 << (32 - PAGE_SHIFT);

/// Errors raised by the fallible constructors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address {0:#010X} is not 4 KiB aligned")]
    Unaligned(u32),
    #[error("address {0:#X} exceeds the 32-bit address space")]
    OutOfRange(u64),
    #[error("page number {0:#X} exceeds the 32-bit address space")]
    PageNumberOutOfRange(u32),
}
