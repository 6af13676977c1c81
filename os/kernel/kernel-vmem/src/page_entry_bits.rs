use bitfield_struct::bitfield;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalAddress, PhysicalPage};

/// A 32-bit i386 paging entry (PDE or PTE) in raw bitfield form.
///
/// Both levels share the same layout: twelve flag bits and a 20-bit frame
/// number. In a directory entry the frame is a page table; in a table entry
/// it is the mapped page.
///
/// ### Bit layout
///
/// | Bits  | Name      | Meaning |
/// |-------|-----------|---------|
/// | 0     | `P`       | Entry is valid |
/// | 1     | `RW`      | Writable (user mode; supervisor ignores it while `CR0.WP` is clear) |
/// | 2     | `US`      | User-mode accessible |
/// | 3     | `PWT`     | Write-through caching |
/// | 4     | `PCD`     | Caching disabled |
/// | 5     | `A`       | Accessed, set by the processor |
/// | 6     | `D`       | Dirty, set by the processor (PTE only) |
/// | 7     | `PS`/`PAT`| Large page in a PDE; must stay clear without PSE |
/// | 8     | `G`       | Global (PTE only, needs `CR4.PGE`) |
/// | 9–11  | available | Free for the operating system |
/// | 12–31 | frame     | Physical frame number |
///
/// Effective permissions are the intersection of the PDE and the PTE: a user
/// mapping needs `US` at both levels.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
/// # use kernel_vmem::PageEntryBits;
/// let frame = PhysicalPage::try_new(PhysicalAddress::new(0x0012_3000)).unwrap();
/// let mut e = PageEntryBits::user_rw();
/// e.set_physical_page(frame);
/// assert_eq!(e.into_bits(), 0x0012_3007);
/// assert_eq!(e.physical_page(), frame);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    ///
    /// Set by the processor on the first access through this entry.
    pub accessed: bool,

    /// Dirty (D, bit 6).
    ///
    /// Set by the processor on the first write through a table entry.
    pub dirty: bool,

    /// Page size (PS, bit 7) in a directory entry; PAT in a table entry.
    ///
    /// Large pages are not used, so this stays clear.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11). Ignored by the processor.
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    /// Mask of the flag bits (everything below the frame number).
    pub const FLAGS_MASK: u32 = (1 << PAGE_SHIFT) - 1;

    #[inline]
    pub const fn set_physical_page(&mut self, frame: PhysicalPage) {
        self.set_frame_number(frame.number());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, frame: PhysicalPage) -> Self {
        self.set_physical_page(frame);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        PhysicalPage::containing_address(PhysicalAddress::new(self.frame_number() << PAGE_SHIFT))
    }

    /// The flag bits alone, with the frame number cleared.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAGS_MASK)
    }

    /// Present, writable, supervisor only.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, read-only, supervisor only.
    #[inline]
    #[must_use]
    pub const fn kernel_ro() -> Self {
        Self::new().with_present(true)
    }

    /// Present, writable, user accessible.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user_access(true)
    }

    /// Present, read-only, user accessible.
    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::kernel_ro().with_user_access(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_sit_in_the_low_bits() {
        assert_eq!(PageEntryBits::kernel_rw().into_bits(), 0b011);
        assert_eq!(PageEntryBits::user_ro().into_bits(), 0b101);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 1 << 6);
        assert_eq!(PageEntryBits::new().with_os_available(0b111).into_bits(), 0xE00);
    }

    #[test]
    fn frame_and_flags_are_independent() {
        let frame = PhysicalPage::from_number(0xFFFFF).unwrap();
        let e = PageEntryBits::kernel_rw().with_physical_page(frame);
        assert_eq!(e.into_bits(), 0xFFFF_F003);
        assert_eq!(e.physical_page(), frame);
        assert_eq!(e.flags_only(), PageEntryBits::kernel_rw());
    }
}
