use crate::{AddressError, MemoryAddress, PAGE_COUNT, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE, PageOffset};
use core::fmt;

/// A page base address (lower 12 bits are zero).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryPage(u32);

impl MemoryPage {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self(addr.as_u32() & PAGE_MASK)
    }

    /// Accept `addr` only if it already is a page base.
    ///
    /// # Errors
    /// [`AddressError::Unaligned`] if any of the low 12 bits is set.
    #[inline]
    pub const fn try_new(addr: MemoryAddress) -> Result<Self, AddressError> {
        if addr.is_page_aligned() {
            Ok(Self(addr.as_u32()))
        } else {
            Err(AddressError::Unaligned(addr.as_u32()))
        }
    }

    /// Page with the given page number (address `>> 12`).
    ///
    /// # Errors
    /// [`AddressError::PageNumberOutOfRange`] for numbers of `2^20` and above.
    #[inline]
    pub const fn from_number(number: u32) -> Result<Self, AddressError> {
        if number >= PAGE_COUNT {
            return Err(AddressError::PageNumberOutOfRange(number));
        }
        Ok(Self(number << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> MemoryAddress {
        MemoryAddress::new(self.0)
    }

    /// Page number, i.e. the base shifted right by 12 bits.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// Combine with an offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> MemoryAddress {
        MemoryAddress::new(self.0 | off.as_u32())
    }

    /// The page `count` pages above this one, `None` past the top of memory.
    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, count: u32) -> Option<Self> {
        let Some(bytes) = count.checked_mul(PAGE_SIZE) else {
            return None;
        };
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0)
    }
}

impl fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPage(0x{:08X})", self.0)
    }
}

impl From<MemoryAddress> for MemoryPage {
    #[inline]
    fn from(addr: MemoryAddress) -> Self {
        Self::from_addr(addr)
    }
}

impl From<MemoryPage> for MemoryAddress {
    #[inline]
    fn from(page: MemoryPage) -> Self {
        page.base()
    }
}
