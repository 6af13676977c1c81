//! # Virtual Memory Support
//!
//! Two-level i386 paging (no PAE, no PSE) for the kernel.
//!
//! ## What you get
//! - [`PageEntryBits`]: the 32-bit entry layout shared by both levels.
//! - [`page_table`]: typed directory/table indices, entries, tables and
//!   volatile views of tables in mapped memory.
//! - [`recursive`]: the recursive windows through which the active tables
//!   are edited.
//! - [`ActivePageTables`]: map, unmap and query on the active directory.
//! - [`bootstrap`]: the boot directory and switching translation on and off.
//! - [`Mmu`]: the processor seam, with [`HardwareMmu`] for i386 and an
//!   emulated MMU behind the `emulated` feature.
//! - A tiny allocator interface ([`FrameAlloc`]) for page table frames.
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | directory | table | offset |
//!
//!  CR3 → Page Directory → Page Table → 4 KiB frame
//!         (1024 PDEs)      (1024 PTEs)
//! ```
//!
//! A PDE always points at a page table; a PTE always maps one 4 KiB frame.
//! Permissions of a mapping are the intersection of its PDE and PTE.
//!
//! ## Layout contract
//!
//! | Directory slots | Content |
//! |-----------------|---------|
//! | 0 | identity map of the first 4 MiB, kernel only |
//! | 1‒767 | user space, private per directory |
//! | 768‒1021 | kernel space, tables shared by every directory |
//! | 1022 | window table mapping the directory at `0xFFBF_F000` |
//! | 1023 | the directory itself: tables at `0xFFC0_0000`, directory at `0xFFFF_F000` |

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod active;
pub mod bootstrap;
#[cfg(any(test, feature = "emulated"))]
pub mod emulated;
pub mod mmu;
mod page_entry_bits;
pub mod page_table;
pub mod recursive;

pub use crate::active::ActivePageTables;
pub use crate::mmu::{HardwareMmu, Mmu};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{DirectoryIndex, PdEntry, PtEntry, TableIndex};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{AddressError, PhysicalPage, VirtualPage};

/// Errors of the paging layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    /// A page table was needed and no frame was available.
    #[error("out of physical frames for a page table")]
    OutOfMemory,
    /// The page belongs to the recursive windows, which are never mapped by hand.
    #[error("{0:?} lies in the recursive paging window")]
    RecursiveWindow(VirtualPage),
    /// Paging is already on.
    #[error("paging is already enabled")]
    AlreadyEnabled,
    /// The directory lacks the identity table or a recursive slot.
    #[error("page directory {0:?} is not ready to be loaded")]
    IncompleteDirectory(PhysicalPage),
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// The implementation decides where frames come from. Frames handed to the
/// paging code become page tables and are only released by the owner of
/// the directory.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        (**self).alloc_4k()
    }
}

/// A frame source that never has frames.
///
/// Used for mappings whose page table is known to exist, for example in
/// kernel space where every table is created at boot.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoFrames;

impl FrameAlloc for NoFrames {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        None
    }
}
