use crate::{AddressError, MemoryPage, PageOffset, VirtualAddress};
use core::fmt;

/// Virtual memory page base.
///
/// A `VirtualPage` represents the **page-aligned base** of a 4 KiB virtual
/// page. It is a thin wrapper over [`MemoryPage`] with virtual-address intent.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xFFBF_F123);
/// let vp = va.page();
/// assert_eq!(vp.number(), 0xFFBFF);
/// assert_eq!(vp.join(va.offset()), va);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(MemoryPage);

impl VirtualPage {
    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self(MemoryPage::from_addr(addr.0))
    }

    /// Accept `addr` only if it is page aligned.
    ///
    /// # Errors
    /// [`AddressError::Unaligned`] otherwise.
    #[inline]
    pub const fn try_new(addr: VirtualAddress) -> Result<Self, AddressError> {
        match MemoryPage::try_new(addr.0) {
            Ok(p) => Ok(Self(p)),
            Err(e) => Err(e),
        }
    }

    /// Page with the given virtual page number.
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
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.number()
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> VirtualAddress {
        VirtualAddress(self.0.join(off))
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

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.base().as_u32())
    }
}

impl TryFrom<VirtualAddress> for VirtualPage {
    type Error = AddressError;

    #[inline]
    fn try_from(va: VirtualAddress) -> Result<Self, AddressError> {
        Self::try_new(va)
    }
}
