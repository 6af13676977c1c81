//! # Page Directory (top level)
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`PdEntry`]: a directory entry. Without PSE it always refers to a page
//!   table, so `PS` is forced clear.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.

use super::{ENTRIES, EntryIndex, IndexError, PagingEntry};
use crate::PageEntryBits;
use kernel_info::memory::{
    DIRECTORY_WINDOW_SLOT, FRAME_STACK_START, KERNEL_START, PAGE_TABLES_SLOT, SCRATCH_WINDOW_START,
};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into the page directory (VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// A single page directory entry (PDE).
///
/// A PDE's `US` and `RW` bits gate every page of its table: a user mapping
/// needs a user PDE.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PdEntry(PageEntryBits);

/// The page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES],
}

impl DirectoryIndex {
    /// The identity-mapped first 4 MiB.
    pub const IDENTITY: Self = Self::of(0);
    /// First kernel-space slot; from here up every directory shares its tables.
    pub const KERNEL_FIRST: Self = Self::of(KERNEL_START);
    /// The table backing the free-frame stack.
    pub const FRAME_STACK: Self = Self::of(FRAME_STACK_START);
    /// The table backing the scratch window.
    pub const SCRATCH: Self = Self::of(SCRATCH_WINDOW_START);
    /// The slot whose table maps the directory itself at its last entry.
    #[allow(clippy::cast_possible_truncation)]
    pub const DIRECTORY_WINDOW: Self = Self(DIRECTORY_WINDOW_SLOT as u16);
    /// The slot that points back at the directory.
    #[allow(clippy::cast_possible_truncation)]
    pub const PAGE_TABLES: Self = Self(PAGE_TABLES_SLOT as u16);

    #[allow(clippy::cast_possible_truncation)]
    const fn of(va: u32) -> Self {
        Self((va >> 22) as u16)
    }

    /// Accept `v` only if it is a valid directory slot.
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

    /// The slot covering `va`.
    #[inline]
    #[must_use]
    pub const fn from_address(va: VirtualAddress) -> Self {
        Self::of(va.as_u32())
    }

    /// First virtual address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
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

    /// User space slots: everything between the identity table and kernel space.
    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 > Self::IDENTITY.0 && self.0 < Self::KERNEL_FIRST.0
    }

    /// Kernel slots shared between directories, excluding the recursive pair.
    #[inline]
    #[must_use]
    pub const fn is_shared_kernel(self) -> bool {
        self.0 >= Self::KERNEL_FIRST.0 && self.0 < Self::DIRECTORY_WINDOW.0
    }

    /// Whether this is one of the two slots that make the directory visible.
    #[inline]
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        self.0 >= Self::DIRECTORY_WINDOW.0
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = Self> + Clone {
        (0..ENTRIES).map(Self::from_slot)
    }

    /// The half-open range `from..to`.
    pub fn range(from: Self, to: Self) -> impl Iterator<Item = Self> + Clone {
        (from.as_usize()..to.as_usize()).map(Self::from_slot)
    }
}

impl EntryIndex for DirectoryIndex {
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

impl PdEntry {
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
    pub const fn is_user(self) -> bool {
        self.0.user_access()
    }

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the frame holding the page table.
    #[inline]
    #[must_use]
    pub fn table(self) -> Option<PhysicalPage> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "large pages are never installed");
        Some(self.0.physical_page())
    }

    /// Link a page table. Forces `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make(table: PhysicalPage, flags: PageEntryBits) -> Self {
        Self(
            flags
                .flags_only()
                .with_present(true)
                .with_large_page(false)
                .with_physical_page(table),
        )
    }

    /// The same entry with `US` set.
    #[inline]
    #[must_use]
    pub const fn with_user_access(self) -> Self {
        Self(self.0.with_user_access(true))
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

impl core::fmt::Debug for PdEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PdEntry(0x{:08X})", self.raw())
    }
}

impl PagingEntry for PdEntry {
    type Index = DirectoryIndex;

    #[inline]
    fn from_raw(raw: u32) -> Self {
        Self::from_raw(raw)
    }

    #[inline]
    fn raw(self) -> u32 {
        Self::raw(self)
    }
}

impl PageDirectory {
    /// All entries non-present.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Plain store; TLB maintenance is up to the caller.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::zeroed()
    }
}
