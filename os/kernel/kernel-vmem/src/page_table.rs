//! # i386 Page Directory and Page Tables
//!
//! A 32-bit virtual address is split into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | directory | table | offset |
//! ```
//!
//! - [`DirectoryIndex`] / [`PdEntry`] / [`PageDirectory`]: the top level,
//!   1024 entries each pointing at a page table.
//! - [`TableIndex`] / [`PtEntry`] / [`PageTable`]: the leaf level,
//!   1024 entries each mapping one 4 KiB frame.
//! - [`TableView`]: volatile access to a table that lives somewhere in
//!   mapped memory, e.g. behind the recursive windows.

mod directory;
mod table;
mod view;

pub use directory::{DirectoryIndex, PageDirectory, PdEntry};
pub use table::{PageTable, PtEntry, TableIndex};
pub use view::{DirectoryView, PageTableView, TableView};

use kernel_memory_addresses::{VirtualAddress, VirtualPage};

/// Entries per directory and per table.
pub const ENTRIES: usize = 1024;

/// An index outside `0..1024` was passed to a fallible index constructor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("paging structure index {0} is outside 0..1024")]
pub struct IndexError(pub u16);

/// Index type of one paging level.
pub trait EntryIndex: Copy {
    fn as_usize(self) -> usize;

    /// Build from a slot known to be below [`ENTRIES`].
    #[doc(hidden)]
    fn from_slot(slot: usize) -> Self;
}

/// A 32-bit entry of one paging level.
pub trait PagingEntry: Copy {
    type Index: EntryIndex;

    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from_address(va), TableIndex::from_address(va))
}

/// The virtual page selected by a directory and a table index.
#[inline]
#[must_use]
pub const fn page_at(directory: DirectoryIndex, table: TableIndex) -> VirtualPage {
    VirtualPage::containing_address(VirtualAddress::new(
        directory.base().as_u32() | ((table.as_u16() as u32) << 12),
    ))
}
