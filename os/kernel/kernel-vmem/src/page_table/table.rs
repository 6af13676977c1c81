//! # Page Table (leaf level)
//!
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`PtEntry`]: a table entry; a present PTE maps exactly one 4 KiB frame.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! After modifying an active mapping the caller must invalidate the page.

use super::{ENTRIES, EntryIndex, IndexError, PagingEntry};
use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into a page table (VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// A single page table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PtEntry(PageEntryBits);

/// A page table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES],
}

impl TableIndex {
    /// The last entry of a table.
    #[allow(clippy::cast_possible_truncation)]
    pub const LAST: Self = Self(ENTRIES as u16 - 1);

    /// Accept `v` only if it is a valid table slot.
    ///
    /// # Errors
    /// [`IndexError`] for values of 1024 and above.
    #[inline]
    pub const fn new(v: u16) -> Result<Self, IndexError> {
        if (v as usize) < ENTRIES {
            Ok(Self(v))
        } else {
            Err(IndexError(v))
        }
    }

    /// The slot covering `va` within its table.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_address(va: VirtualAddress) -> Self {
        Self(((va.as_u32() >> 12) & 0x3FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = Self> + Clone {
        (0..ENTRIES).map(Self::from_slot)
    }
}

impl EntryIndex for TableIndex {
    #[inline]
    fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn from_slot(slot: usize) -> Self {
        debug_assert!(slot < ENTRIES);
        Self(slot as u16)
    }
}

impl PtEntry {
    /// A non-present entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the mapped frame and the entry's flags.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Option<(PhysicalPage, PageEntryBits)> {
        if !self.is_present() {
            return None;
        }
        Some((self.0.physical_page(), self.0.flags_only()))
    }

    /// Map `page` with `flags`. Forces `present=1` and clears `PAT`.
    #[inline]
    #[must_use]
    pub const fn make(page: PhysicalPage, flags: PageEntryBits) -> Self {
        Self(
            flags
                .flags_only()
                .with_present(true)
                .with_large_page(false)
                .with_physical_page(page),
        )
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    /// No validation is performed.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl core::fmt::Debug for PtEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PtEntry(0x{:08X})", self.raw())
    }
}

impl PagingEntry for PtEntry {
    type Index = TableIndex;

    #[inline]
    fn from_raw(raw: u32) -> Self {
        Self::from_raw(raw)
    }

    #[inline]
    fn raw(self) -> u32 {
        Self::raw(self)
    }
}

impl PageTable {
    /// All entries non-present.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Plain store; TLB maintenance is up to the caller.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}
