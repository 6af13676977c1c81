//! # Recursive Windows
//!
//! Two directory slots make the active paging structures addressable as
//! ordinary memory, with no physical-to-virtual mapping of their own:
//!
//! ```text
//! PDE 1023 ──► directory itself
//!     table i       at PAGE_TABLES_WINDOW + i * 4096   (0xFFC0_0000..)
//!     directory     at PAGE_DIRECTORY_SELF_WINDOW      (0xFFFF_F000)
//!
//! PDE 1022 ──► private window table, entry 1023 ──► directory
//!     directory     at PAGE_DIRECTORY_WINDOW           (0xFFBF_F000)
//! ```
//!
//! Both slots are private to each directory and rebuilt whenever a directory
//! is created. The window table only ever maps the directory.

use crate::PageEntryBits;
use crate::mmu::Mmu;
use crate::page_table::{
    DirectoryIndex, DirectoryView, PageTableView, PdEntry, PtEntry, TableIndex, page_at,
};
use kernel_info::memory::{PAGE_DIRECTORY_SELF_WINDOW, PAGE_DIRECTORY_WINDOW, RECURSIVE_REGION_START};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};

/// Flags of both recursive links: kernel only, writable.
#[must_use]
pub const fn link_flags() -> PageEntryBits {
    PageEntryBits::kernel_rw()
}

/// The current directory through slot 1022.
#[must_use]
pub const fn directory_window() -> VirtualPage {
    VirtualPage::containing_address(VirtualAddress::new(PAGE_DIRECTORY_WINDOW))
}

/// The current directory through slot 1023.
#[must_use]
pub const fn directory_self_window() -> VirtualPage {
    VirtualPage::containing_address(VirtualAddress::new(PAGE_DIRECTORY_SELF_WINDOW))
}

/// Where the page table referenced by directory slot `i` is visible.
#[must_use]
pub const fn table_window(i: DirectoryIndex) -> VirtualPage {
    page_at(DirectoryIndex::PAGE_TABLES, table_index(i))
}

/// Whether `va` belongs to the 8 MiB covered by the two recursive slots.
#[must_use]
pub const fn is_recursive_region(va: VirtualAddress) -> bool {
    va.as_u32() >= RECURSIVE_REGION_START
}

const fn table_index(i: DirectoryIndex) -> TableIndex {
    match TableIndex::new(i.as_u16()) {
        Ok(t) => t,
        // both levels share the 0..1024 range
        Err(_) => TableIndex::LAST,
    }
}

/// Point slot 1023 at `directory` and slot 1022 at `window_table`, whose
/// last entry in turn maps `directory`. The rest of `window_table` is cleared.
pub fn install(
    dir: &mut DirectoryView<'_>,
    directory: PhysicalPage,
    window: &mut PageTableView<'_>,
    window_table: PhysicalPage,
) {
    window.zero();
    window.set(TableIndex::LAST, PtEntry::make(directory, link_flags()));
    dir.set(
        DirectoryIndex::DIRECTORY_WINDOW,
        PdEntry::make(window_table, link_flags()),
    );
    dir.set(DirectoryIndex::PAGE_TABLES, PdEntry::make(directory, link_flags()));
}

/// Whether `dir` (stored in frame `directory`) carries both recursive slots.
///
/// `window` is the table slot 1022 points at, or `None` if it is not reachable.
#[must_use]
pub fn is_installed(
    dir: &DirectoryView<'_>,
    directory: PhysicalPage,
    window: Option<&PageTableView<'_>>,
) -> bool {
    let self_link = dir.get(DirectoryIndex::PAGE_TABLES).table() == Some(directory);
    let window_link = dir.get(DirectoryIndex::DIRECTORY_WINDOW).is_present()
        && window.is_some_and(|w| {
            w.get(TableIndex::LAST).page().map(|(frame, _)| frame) == Some(directory)
        });
    self_link && window_link
}

/// The active directory through its self-map.
///
/// # Safety
/// Paging must be enabled with a directory whose recursive slots are installed.
#[must_use]
pub unsafe fn active_directory<'a, M: Mmu + ?Sized>(mmu: &M) -> DirectoryView<'a> {
    unsafe { DirectoryView::from_ptr(mmu.page_ptr(directory_self_window())) }
}

/// The active directory through the slot-1022 window table.
///
/// # Safety
/// As for [`active_directory`].
#[must_use]
pub unsafe fn active_directory_via_window<'a, M: Mmu + ?Sized>(mmu: &M) -> DirectoryView<'a> {
    unsafe { DirectoryView::from_ptr(mmu.page_ptr(directory_window())) }
}

/// Page table `i` of the active directory.
///
/// # Safety
/// As for [`active_directory`]; additionally slot `i` must be present.
#[must_use]
pub unsafe fn active_table<'a, M: Mmu + ?Sized>(mmu: &M, i: DirectoryIndex) -> PageTableView<'a> {
    unsafe { PageTableView::from_ptr(mmu.page_ptr(table_window(i))) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::{PageDirectory, PageTable};

    #[test]
    fn window_addresses() {
        assert_eq!(directory_window().base().as_u32(), 0xFFBF_F000);
        assert_eq!(directory_self_window().base().as_u32(), 0xFFFF_F000);
        assert_eq!(table_window(DirectoryIndex::KERNEL_FIRST).base().as_u32(), 0xFFF0_0000);
        assert_eq!(table_window(DirectoryIndex::PAGE_TABLES), directory_self_window());
        assert_eq!(table_window(DirectoryIndex::DIRECTORY_WINDOW).base().as_u32(), 0xFFFF_E000);
        assert!(is_recursive_region(VirtualAddress::new(0xFF80_0000)));
        assert!(!is_recursive_region(VirtualAddress::new(0xFF7F_FFFF)));
    }

    #[test]
    fn install_then_verify() {
        let dir_frame = PhysicalPage::from_number(0x100).unwrap();
        let window_frame = PhysicalPage::from_number(0x101).unwrap();
        let mut d = PageDirectory::zeroed();
        let mut t = PageTable::zeroed();
        let mut dv = DirectoryView::from(&mut d);
        let mut tv = PageTableView::from(&mut t);

        assert!(!is_installed(&dv, dir_frame, Some(&tv)));
        install(&mut dv, dir_frame, &mut tv, window_frame);
        assert!(is_installed(&dv, dir_frame, Some(&tv)));
        assert!(!is_installed(&dv, dir_frame, None));
        assert!(!is_installed(&dv, window_frame, Some(&tv)));
        assert_eq!(dv.get(DirectoryIndex::DIRECTORY_WINDOW).table(), Some(window_frame));
        assert!(!dv.get(DirectoryIndex::PAGE_TABLES).is_user());
    }
}
