use crate::{AddressError, MemoryPage, PageOffset, PhysicalAddress};
use core::fmt;

/// Physical frame: the page-aligned base of 4 KiB of physical memory.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(MemoryPage);

impl PhysicalPage {
    /// Frame that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: PhysicalAddress) -> Self {
        Self(MemoryPage::from_addr(addr.0))
    }

    /// Accept `addr` only if it is frame aligned.
    ///
    /// # Errors
    /// [`AddressError::Unaligned`] otherwise.
    #[inline]
    pub const fn try_new(addr: PhysicalAddress) -> Result<Self, AddressError> {
        match MemoryPage::try_new(addr.0) {
            Ok(p) => Ok(Self(p)),
            Err(e) => Err(e),
        }
    }

    /// Frame with the given frame number.
    ///
    /// # Errors
    /// [`AddressError::PageNumberOutOfRange`] for numbers of `2^20` and above.
    #[inline]
    pub const fn from_number(number: u32) -> Result<Self, AddressError> {
        match MemoryPage::from_number(number) {
            Ok(p) => Ok(Self(p)),
            Err(e) => Err(e),
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.number()
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> PhysicalAddress {
        PhysicalAddress(self.0.join(off))
    }

    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, count: u32) -> Option<Self> {
        match self.0.checked_add_pages(count) {
            Some(p) => Some(Self(p)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        self.checked_add_pages(1)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:08X})", self.base().as_u32())
    }
}

impl TryFrom<PhysicalAddress> for PhysicalPage {
    type Error = AddressError;

    #[inline]
    fn try_from(pa: PhysicalAddress) -> Result<Self, AddressError> {
        Self::try_new(pa)
    }
}
