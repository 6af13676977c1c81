//! # Scratch Window
//!
//! A small run of kernel pages at [`SCRATCH_WINDOW_START`] used to reach
//! frames that are not mapped anywhere in the active directory: the
//! directory and tables of another address space, or a frame being zeroed
//! or copied. Its page table is created at boot and shared by every
//! directory, so mapping a slot never allocates.
//!
//! A slot stays mapped until it is handed back with [`ScratchWindow::unmap`]
//! or the whole window is cleared with [`ScratchWindow::release_all`].

use crate::vmm::VmmError;
use kernel_info::memory::{SCRATCH_WINDOW_PAGES, SCRATCH_WINDOW_START};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::page_table::{PagingEntry, TableView};
use kernel_vmem::{ActivePageTables, Mmu, NoFrames, PageEntryBits};
use log::trace;

const _: () = assert!(SCRATCH_WINDOW_PAGES <= u32::BITS);

/// Bookkeeping for the scratch window; one bit per page.
#[derive(Debug, Default)]
pub struct ScratchWindow {
    in_use: u32,
}

/// A mapped scratch page. Not `Clone`: each slot has one owner.
#[derive(Debug, PartialEq, Eq)]
pub struct ScratchSlot {
    index: u32,
    frame: PhysicalPage,
}

impl ScratchSlot {
    /// The virtual page the frame is visible at.
    #[must_use]
    pub const fn page(&self) -> VirtualPage {
        VirtualPage::containing_address(VirtualAddress::new(
            SCRATCH_WINDOW_START + self.index * PAGE_SIZE,
        ))
    }

    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        self.frame
    }

    /// The mapped frame as a directory or page table.
    ///
    /// # Safety
    /// The slot must stay mapped while the view lives and nothing else may
    /// access the frame at the same time.
    #[must_use]
    pub unsafe fn table<'a, E: PagingEntry, M: Mmu + ?Sized>(&self, mmu: &M) -> TableView<'a, E> {
        unsafe { TableView::from_ptr(mmu.page_ptr(self.page())) }
    }

    /// The mapped frame as bytes.
    ///
    /// # Safety
    /// As for [`table`](Self::table).
    #[must_use]
    pub unsafe fn bytes<'a, M: Mmu + ?Sized>(&self, mmu: &M) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(mmu.page_ptr(self.page()), PAGE_SIZE as usize) }
    }
}

impl ScratchWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self { in_use: 0 }
    }

    /// Number of slots currently mapped.
    #[must_use]
    pub const fn in_use(&self) -> u32 {
        self.in_use.count_ones()
    }

    /// Map `frame` at the first free slot, kernel only and writable.
    ///
    /// # Errors
    /// - [`VmmError::ScratchExhausted`] if every slot is taken.
    /// - [`VmmError::Paging`] if the window's page table is missing.
    pub fn map<M: Mmu + ?Sized>(&mut self, mmu: &M, frame: PhysicalPage) -> Result<ScratchSlot, VmmError> {
        let index = (!self.in_use).trailing_zeros();
        if index >= SCRATCH_WINDOW_PAGES {
            return Err(VmmError::ScratchExhausted);
        }
        let slot = ScratchSlot { index, frame };
        // Safety: the scratch range belongs to this window alone.
        let mut tables = unsafe { ActivePageTables::new(mmu) };
        tables.map(&mut NoFrames, slot.page(), frame, PageEntryBits::kernel_rw())?;
        self.in_use |= 1 << index;
        trace!("scratch slot {index} -> {frame:?}");
        Ok(slot)
    }

    /// Unmap `slot`.
    ///
    /// # Errors
    /// [`VmmError::Paging`] if the window's page table is missing.
    #[allow(clippy::needless_pass_by_value)] // the slot is spent
    pub fn unmap<M: Mmu + ?Sized>(&mut self, mmu: &M, slot: ScratchSlot) -> Result<(), VmmError> {
        // Safety: as in `map`.
        let mut tables = unsafe { ActivePageTables::new(mmu) };
        tables.unmap(slot.page())?;
        self.in_use &= !(1 << slot.index);
        Ok(())
    }

    /// Unmap every slot still in use. Used on error paths where the slots
    /// themselves were dropped.
    pub fn release_all<M: Mmu + ?Sized>(&mut self, mmu: &M) {
        // Safety: as in `map`.
        let mut tables = unsafe { ActivePageTables::new(mmu) };
        while self.in_use != 0 {
            let index = self.in_use.trailing_zeros();
            let page = VirtualPage::containing_address(VirtualAddress::new(
                SCRATCH_WINDOW_START + index * PAGE_SIZE,
            ));
            // the window is never in the recursive region
            let _ = tables.unmap(page);
            self.in_use &= !(1 << index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_vmem::DirectoryIndex;
    use kernel_vmem::bootstrap::{build_boot_directory, enable_translation};
    use kernel_vmem::emulated::{BumpFrames, EmulatedMachine, Privilege};
    use kernel_vmem::page_table::PageTableView;

    fn booted() -> EmulatedMachine {
        let m = EmulatedMachine::new(1024);
        let mut frames = BumpFrames::new(0x10_0000, 0x20_0000);
        let dir = build_boot_directory(&m, &mut frames, [DirectoryIndex::SCRATCH]).unwrap();
        unsafe { enable_translation(&m, dir).unwrap() };
        m
    }

    fn frame(n: u32) -> PhysicalPage {
        PhysicalPage::from_number(n).unwrap()
    }

    #[test]
    fn slots_map_and_unmap() {
        let m = booted();
        let mut w = ScratchWindow::new();
        m.write_phys_u32(PhysicalAddress::new(0x0030_0008), 0xC0FF_EE00);

        let a = w.map(&m, frame(0x300)).unwrap();
        let b = w.map(&m, frame(0x301)).unwrap();
        assert_eq!(a.page().base().as_u32(), SCRATCH_WINDOW_START);
        assert_eq!(b.page().base().as_u32(), SCRATCH_WINDOW_START + PAGE_SIZE);
        assert_eq!(w.in_use(), 2);
        assert_eq!(
            m.load_u32(a.page().base() + 8, Privilege::Supervisor),
            Ok(0xC0FF_EE00)
        );
        assert!(m.load_u32(a.page().base(), Privilege::User).is_err());

        let page_a = a.page();
        w.unmap(&m, a).unwrap();
        assert!(m.load_u32(page_a.base(), Privilege::Supervisor).is_err());
        // the freed slot is reused first
        let c = w.map(&m, frame(0x302)).unwrap();
        assert_eq!(c.page(), page_a);
        w.unmap(&m, b).unwrap();
        w.unmap(&m, c).unwrap();
        assert_eq!(w.in_use(), 0);
    }

    #[test]
    fn window_runs_out() {
        let m = booted();
        let mut w = ScratchWindow::new();
        let slots: Vec<_> = (0..SCRATCH_WINDOW_PAGES)
            .map(|i| w.map(&m, frame(0x300 + i)).unwrap())
            .collect();
        assert_eq!(w.map(&m, frame(0x3FF)), Err(VmmError::ScratchExhausted));
        drop(slots);
        w.release_all(&m);
        assert_eq!(w.in_use(), 0);
        assert!(m.load_u32(VirtualAddress::new(SCRATCH_WINDOW_START), Privilege::Supervisor).is_err());
    }

    #[test]
    fn views_reach_the_frame() {
        let m = booted();
        let mut w = ScratchWindow::new();
        let slot = w.map(&m, frame(0x310)).unwrap();
        unsafe { slot.bytes(&m) }.fill(0xAB);
        let table: PageTableView<'_> = unsafe { slot.table(&m) };
        assert!(table.iter().all(|(_, e)| e.raw() == 0xABAB_ABAB));
        assert_eq!(m.read_phys_u32(PhysicalAddress::new(0x0031_0FFC)), 0xABAB_ABAB);
        w.unmap(&m, slot).unwrap();
    }
}
